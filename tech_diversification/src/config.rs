//! TOML experiment files
//!
//! ```toml
//! [experiment]
//! name = "gamma_sweep"
//! repetitions = 1000
//!
//! [sweep]
//! parameter = "gamma"
//! values = [0.05, 0.1, 0.15, 0.2]
//!
//! [[countries]]
//! name = "USA"
//! initial_gdp = 2444.644
//! population = 40241.0
//! ```
//!
//! Every other section is optional and falls back to the model defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use des::parallel::{simple_progress_reporter, Dispatcher};
use serde::Deserialize;

use crate::analysis::DecadeWindow;
use crate::countries::{InitialConditions, InlineCountries, MaddisonCsv};
use crate::error::{ModelError, Result};
use crate::ledger::Stores;
use crate::params::{CalibrationTargets, Country, ModelParams};
use crate::sweep::{SweepConfig, SweptParameter};

#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentConfig {
    pub experiment: ExperimentMetadata,
    #[serde(default)]
    pub model: ModelParams,
    #[serde(default)]
    pub calibration: CalibrationTargets,
    #[serde(default)]
    pub window: WindowSettings,
    pub sweep: SweepSettings,
    #[serde(default)]
    pub dispatch: DispatchSettings,
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(default)]
    pub countries: Vec<Country>,
    pub data: Option<DataSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub repetitions: usize,
    #[serde(default = "default_periods")]
    pub periods: usize,
    #[serde(default = "default_seed")]
    pub base_seed: u64,
}

fn default_periods() -> usize {
    142 // 1870 to 2011
}

fn default_seed() -> u64 {
    42
}

/// Statistics window in periods since the start of the simulation
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub start: usize,
    pub end: usize,
}

impl Default for WindowSettings {
    fn default() -> Self {
        let window = DecadeWindow::default();
        WindowSettings {
            start: window.start,
            end: window.end,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepSettings {
    pub parameter: SweptParameter,
    /// Defaults to the parameter's standard grid
    pub values: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispatchSettings {
    /// Dedicated pool size; rayon's global pool when absent
    pub num_threads: Option<usize>,
    pub timeout_secs: Option<f64>,
    pub progress_interval: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub directory: PathBuf,
    pub write_summary_csv: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        OutputSettings {
            directory: PathBuf::from("results"),
            write_summary_csv: true,
        }
    }
}

impl OutputSettings {
    pub fn ledger_path(&self, parameter: SweptParameter) -> PathBuf {
        self.directory.join(format!("jobs.{parameter}.json"))
    }

    pub fn results_path(&self, parameter: SweptParameter) -> PathBuf {
        self.directory.join(format!("stats.{parameter}.json"))
    }

    pub fn summary_csv_path(&self, parameter: SweptParameter) -> PathBuf {
        self.directory.join(format!("summary.{parameter}.csv"))
    }
}

/// Country data read from CSV instead of listed inline
#[derive(Debug, Clone, Deserialize)]
pub struct DataSettings {
    pub gdp_csv: PathBuf,
    pub population_csv: PathBuf,
    pub limit: Option<usize>,
}

impl ExperimentConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: ExperimentConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        if self.experiment.repetitions == 0 {
            return Err(ModelError::configuration("experiment needs at least one repetition"));
        }
        if self.sweep.values.as_ref().is_some_and(Vec::is_empty) {
            return Err(ModelError::configuration("sweep values must not be empty"));
        }
        if self.data.is_some() && !self.countries.is_empty() {
            return Err(ModelError::configuration(
                "list countries inline or point to data files, not both",
            ));
        }
        if let Some(timeout) = self.dispatch.timeout_secs {
            if !(timeout.is_finite() && timeout > 0.0) {
                return Err(ModelError::configuration(format!(
                    "timeout_secs must be positive, got {timeout}"
                )));
            }
        }
        let window = self.decade_window()?;
        window.fits(self.experiment.periods)
    }

    /// Window blocks are one decade long at the model's time step
    pub fn decade_window(&self) -> Result<DecadeWindow> {
        DecadeWindow::new(self.window.start, self.window.end, self.model.decade_len())
    }

    pub fn sweep_config(&self) -> Result<SweepConfig> {
        let parameter = self.sweep.parameter;
        Ok(SweepConfig {
            parameter,
            values: self
                .sweep
                .values
                .clone()
                .unwrap_or_else(|| parameter.default_values()),
            repetitions: self.experiment.repetitions,
            periods: self.experiment.periods,
            window: self.decade_window()?,
            base_seed: self.experiment.base_seed,
        })
    }

    pub fn dispatcher(&self) -> Result<Dispatcher> {
        let mut builder = Dispatcher::builder();
        if let Some(n) = self.dispatch.num_threads {
            builder = builder.num_threads(n);
        }
        if let Some(secs) = self.dispatch.timeout_secs {
            builder = builder.timeout(Duration::from_secs_f64(secs));
        }
        if let Some(interval) = self.dispatch.progress_interval {
            builder = builder.progress(simple_progress_reporter(interval));
        }
        Ok(builder.build()?)
    }

    pub fn initial_conditions(&self) -> Box<dyn InitialConditions> {
        match &self.data {
            Some(data) => Box::new(MaddisonCsv {
                gdp_path: data.gdp_csv.clone(),
                population_path: data.population_csv.clone(),
                limit: data.limit,
            }),
            None => Box::new(InlineCountries::new(self.countries.clone())),
        }
    }

    pub fn load_countries(&self) -> Result<Vec<Country>> {
        let countries = self.initial_conditions().countries()?;
        if countries.is_empty() {
            return Err(ModelError::configuration("experiment has no countries"));
        }
        Ok(countries)
    }

    pub fn stores(&self) -> Result<Stores> {
        let parameter = self.sweep.parameter;
        Stores::open(
            self.output.ledger_path(parameter),
            self.output.results_path(parameter),
        )
    }
}
