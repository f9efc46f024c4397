//! Decadal growth statistics of a simulated world
//!
//! A world is a T×I matrix of GDP series, one column per country. Growth
//! rates are averaged over non-overlapping decade blocks inside a window,
//! and the five statistics of a repetition are computed from those decadal
//! moments.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Names of the statistics reported for every repetition, in report order
pub const STAT_NAMES: [&str; 5] = [
    "cross section beta",
    "time series beta",
    "early dispersion",
    "late dispersion",
    "average skewness",
];

/// GDP of every country in one repetition, columns in country order
#[derive(Debug, Clone, Default)]
pub struct WorldGdp {
    periods: usize,
    columns: Vec<Vec<f64>>,
}

impl WorldGdp {
    pub fn new(periods: usize) -> Self {
        WorldGdp {
            periods,
            columns: Vec::new(),
        }
    }

    /// Stack the series as columns; every series must span the same periods
    pub fn from_columns(columns: Vec<Vec<f64>>) -> Result<Self> {
        let periods = columns.first().map_or(0, Vec::len);
        let mut world = WorldGdp::new(periods);
        for column in columns {
            world.push_country(column)?;
        }
        Ok(world)
    }

    pub fn push_country(&mut self, series: Vec<f64>) -> Result<()> {
        if series.len() != self.periods {
            return Err(ModelError::numerical(format!(
                "country {} has {} periods, world has {}",
                self.columns.len(),
                series.len(),
                self.periods
            )));
        }
        self.columns.push(series);
        Ok(())
    }

    pub fn periods(&self) -> usize {
        self.periods
    }

    pub fn countries(&self) -> usize {
        self.columns.len()
    }

    pub fn get(&self, period: usize, country: usize) -> Option<f64> {
        self.columns.get(country)?.get(period).copied()
    }

    pub fn stats(&self, window: &DecadeWindow) -> Result<WorldStats> {
        DecadalPanel::new(self, window)?.stats()
    }
}

/// Periods `[start, end)` cut into blocks of `block_len` periods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecadeWindow {
    pub start: usize,
    pub end: usize,
    pub block_len: usize,
}

impl DecadeWindow {
    pub fn new(start: usize, end: usize, block_len: usize) -> Result<Self> {
        let window = DecadeWindow {
            start,
            end,
            block_len,
        };
        window.validate()?;
        Ok(window)
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_len == 0 {
            return Err(ModelError::configuration("decade block length must be positive"));
        }
        if self.end <= self.start || (self.end - self.start) % self.block_len != 0 {
            return Err(ModelError::configuration(format!(
                "window [{}, {}) is not a positive multiple of {} periods",
                self.start, self.end, self.block_len
            )));
        }
        Ok(())
    }

    /// Growth at the last period of the window needs one more GDP value
    pub fn fits(&self, periods: usize) -> Result<()> {
        if self.end >= periods {
            return Err(ModelError::configuration(format!(
                "window ends at {} but only {} periods are simulated",
                self.end, periods
            )));
        }
        Ok(())
    }

    pub fn decades(&self) -> usize {
        (self.end - self.start) / self.block_len
    }
}

impl Default for DecadeWindow {
    /// 1960 to 2010 in a simulation starting in 1870
    fn default() -> Self {
        DecadeWindow {
            start: 90,
            end: 140,
            block_len: 10,
        }
    }
}

/// The five statistics of one repetition
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldStats {
    pub cross_section_beta: f64,
    pub time_series_beta: f64,
    pub early_dispersion: f64,
    pub late_dispersion: f64,
    pub average_skewness: f64,
}

impl WorldStats {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values()
            .into_iter()
            .find(|(stat, _)| *stat == name)
            .map(|(_, value)| value)
    }

    pub fn values(&self) -> [(&'static str, f64); 5] {
        [
            (STAT_NAMES[0], self.cross_section_beta),
            (STAT_NAMES[1], self.time_series_beta),
            (STAT_NAMES[2], self.early_dispersion),
            (STAT_NAMES[3], self.late_dispersion),
            (STAT_NAMES[4], self.average_skewness),
        ]
    }

    pub fn is_finite(&self) -> bool {
        self.values().iter().all(|(_, value)| value.is_finite())
    }
}

/// Decadal moments, indexed `[decade][country]`
#[derive(Debug, Clone)]
pub struct DecadalPanel {
    pub mean_log_gdp: Vec<Vec<f64>>,
    pub mean_growth: Vec<Vec<f64>>,
    pub growth_std: Vec<Vec<f64>>,
    pub skewness: Vec<Vec<f64>>,
}

impl DecadalPanel {
    pub fn new(world: &WorldGdp, window: &DecadeWindow) -> Result<Self> {
        window.validate()?;
        window.fits(world.periods())?;
        if world.countries() == 0 {
            return Err(ModelError::numerical("world has no countries"));
        }

        let log_gdp: Vec<Vec<f64>> = world
            .columns
            .iter()
            .enumerate()
            .map(|(country, series)| log_series(country, &series[..=window.end]))
            .collect::<Result<_>>()?;

        let decades = window.decades();
        let countries = world.countries();
        let block = window.block_len;
        let mut panel = DecadalPanel {
            mean_log_gdp: vec![vec![0.0; countries]; decades],
            mean_growth: vec![vec![0.0; countries]; decades],
            growth_std: vec![vec![0.0; countries]; decades],
            skewness: vec![vec![0.0; countries]; decades],
        };

        for (country, logs) in log_gdp.iter().enumerate() {
            for decade in 0..decades {
                let from = window.start + decade * block;
                let to = from + block;
                let growth: Vec<f64> = (from..to).map(|t| logs[t + 1] - logs[t]).collect();

                let mean_growth = mean(&growth);
                let std = std_dev(&growth);
                if std.is_nan() || std <= 0.0 {
                    return Err(ModelError::numerical(format!(
                        "country {country} has zero growth variance in decade {decade}"
                    )));
                }
                let skewness = growth
                    .iter()
                    .map(|g| ((g - mean_growth) / std).powi(3))
                    .sum::<f64>()
                    / block as f64;

                panel.mean_log_gdp[decade][country] = mean(&logs[from..to]);
                panel.mean_growth[decade][country] = mean_growth;
                panel.growth_std[decade][country] = std;
                panel.skewness[decade][country] = skewness;
            }
        }
        Ok(panel)
    }

    pub fn decades(&self) -> usize {
        self.mean_log_gdp.len()
    }

    fn log_std(&self) -> Vec<Vec<f64>> {
        self.growth_std
            .iter()
            .map(|row| row.iter().map(|s| s.ln()).collect())
            .collect()
    }

    /// Volatility against development across countries, decade effects removed
    pub fn cross_section_beta(&self) -> Result<f64> {
        regress(
            &cross_section_demean(&self.log_std()),
            &cross_section_demean(&self.mean_log_gdp),
        )
    }

    /// Volatility against development over time, country effects removed
    pub fn time_series_beta(&self) -> Result<f64> {
        regress(
            &time_series_demean(&self.log_std()),
            &time_series_demean(&self.mean_log_gdp),
        )
    }

    /// Cross-country dispersion of log GDP in the given decade
    pub fn dispersion(&self, decade: usize) -> Result<f64> {
        self.mean_log_gdp
            .get(decade)
            .map(|row| std_dev(row))
            .ok_or_else(|| ModelError::numerical(format!("no decade {decade} in window")))
    }

    pub fn average_skewness(&self) -> f64 {
        let all: Vec<f64> = self.skewness.iter().flatten().copied().collect();
        mean(&all)
    }

    pub fn stats(&self) -> Result<WorldStats> {
        let last = self.decades().saturating_sub(1);
        Ok(WorldStats {
            cross_section_beta: self.cross_section_beta()?,
            time_series_beta: self.time_series_beta()?,
            early_dispersion: self.dispersion(0)?,
            late_dispersion: self.dispersion(last)?,
            average_skewness: self.average_skewness(),
        })
    }
}

fn log_series(country: usize, series: &[f64]) -> Result<Vec<f64>> {
    series
        .iter()
        .enumerate()
        .map(|(t, &gdp)| {
            if gdp.is_finite() && gdp > 0.0 {
                Ok(gdp.ln())
            } else {
                Err(ModelError::numerical(format!(
                    "country {country} has GDP {gdp} in period {t}"
                )))
            }
        })
        .collect()
}

/// Subtract each decade's cross-country mean, flattened row by row
pub fn cross_section_demean(matrix: &[Vec<f64>]) -> Vec<f64> {
    matrix
        .iter()
        .flat_map(|row| {
            let m = mean(row);
            row.iter().map(move |x| x - m)
        })
        .collect()
}

/// Subtract each country's mean over decades, flattened row by row
pub fn time_series_demean(matrix: &[Vec<f64>]) -> Vec<f64> {
    let countries = matrix.first().map_or(0, Vec::len);
    let column_means: Vec<f64> = (0..countries)
        .map(|i| matrix.iter().map(|row| row[i]).sum::<f64>() / matrix.len() as f64)
        .collect();
    matrix
        .iter()
        .flat_map(|row| row.iter().zip(&column_means).map(|(x, m)| x - m))
        .collect()
}

/// OLS slope of `y` on `x` without intercept
pub fn regress(y: &[f64], x: &[f64]) -> Result<f64> {
    let xx: f64 = x.iter().map(|v| v * v).sum();
    if !xx.is_finite() || xx <= 0.0 {
        return Err(ModelError::numerical(format!(
            "singular regression: sum of squared regressors is {xx}"
        )));
    }
    let xy: f64 = x.iter().zip(y).map(|(a, b)| a * b).sum();
    Ok(xy / xx)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Summary of the observations of one statistic across repetitions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeanStd {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl MeanStd {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        Some(MeanStd {
            count: values.len(),
            mean: mean(values),
            std: std_dev(values),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}
