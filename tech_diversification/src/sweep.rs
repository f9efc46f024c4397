//! Parameter sweeps over repeated scenarios
//!
//! For every value of the swept parameter the model is recalibrated, the
//! scenario is repeated K times on the dispatcher and each successful
//! repetition lands in the result store. Repetitions already in the store
//! are skipped, so an interrupted sweep picks up where it stopped.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use des::parallel::{Dispatcher, TaskHandle};
use serde::{Deserialize, Serialize};

use crate::analysis::{DecadeWindow, MeanStd, WorldStats};
use crate::error::{ModelError, Result};
use crate::ledger::{JobRecord, Stores};
use crate::params::{CalibrationTargets, Country, ModelParams};
use crate::scenario::Scenario;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SweptParameter {
    #[serde(rename = "gamma")]
    Gamma,
    #[serde(rename = "eta")]
    Eta,
    #[serde(rename = "epsilon")]
    Epsilon,
    #[serde(rename = "theta_N")]
    ThetaN,
    #[serde(rename = "theta_m0")]
    ThetaM0,
    /// Repeats the baseline without changing anything
    #[serde(rename = "dummy")]
    Dummy,
}

impl SweptParameter {
    pub const ALL: [SweptParameter; 6] = [
        SweptParameter::Gamma,
        SweptParameter::Eta,
        SweptParameter::Epsilon,
        SweptParameter::ThetaN,
        SweptParameter::ThetaM0,
        SweptParameter::Dummy,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SweptParameter::Gamma => "gamma",
            SweptParameter::Eta => "eta",
            SweptParameter::Epsilon => "epsilon",
            SweptParameter::ThetaN => "theta_N",
            SweptParameter::ThetaM0 => "theta_m0",
            SweptParameter::Dummy => "dummy",
        }
    }

    pub fn apply(&self, params: &mut ModelParams, value: f64) {
        match self {
            SweptParameter::Gamma => params.gamma = value,
            SweptParameter::Eta => params.eta = value,
            SweptParameter::Epsilon => params.epsilon = value,
            SweptParameter::ThetaN => params.theta_n = value,
            SweptParameter::ThetaM0 => params.theta_m0 = value,
            SweptParameter::Dummy => {}
        }
    }

    /// Values tried when an experiment does not list its own
    pub fn default_values(&self) -> Vec<f64> {
        match self {
            SweptParameter::Gamma | SweptParameter::Eta => vec![0.05, 0.1, 0.15, 0.2],
            SweptParameter::Epsilon => vec![2.1, 3.0, 5.0],
            SweptParameter::ThetaN | SweptParameter::ThetaM0 => vec![0.01, 0.03, 0.05],
            SweptParameter::Dummy => vec![1.0],
        }
    }
}

impl fmt::Display for SweptParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SweptParameter {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        SweptParameter::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| ModelError::configuration(format!("unknown swept parameter {s:?}")))
    }
}

/// What to sweep and how often to repeat each value
#[derive(Debug, Clone, PartialEq)]
pub struct SweepConfig {
    pub parameter: SweptParameter,
    pub values: Vec<f64>,
    pub repetitions: usize,
    pub periods: usize,
    pub window: DecadeWindow,
    pub base_seed: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        SweepConfig {
            parameter: SweptParameter::Gamma,
            values: SweptParameter::Gamma.default_values(),
            repetitions: 1000,
            periods: 142,
            window: DecadeWindow::default(),
            base_seed: 42,
        }
    }
}

/// Outcome of one swept value
#[derive(Debug, Clone, Serialize)]
pub struct ValueReport {
    pub value: f64,
    pub requested: usize,
    pub completed: usize,
    /// Repetitions dispatched in this run that produced no statistics
    pub failures: usize,
    pub summaries: Vec<(String, MeanStd)>,
}

impl ValueReport {
    pub fn shortfall(&self) -> usize {
        self.requested.saturating_sub(self.completed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub parameter: SweptParameter,
    pub values: Vec<ValueReport>,
}

/// Baseline parameters with the swept value applied, then recalibrated
pub fn params_for_value(
    base: &ModelParams,
    targets: &CalibrationTargets,
    parameter: SweptParameter,
    value: f64,
) -> Result<ModelParams> {
    let mut params = base.clone();
    parameter.apply(&mut params, value);
    let params = params.calibrated(targets)?;
    params.validate()?;
    Ok(params)
}

/// Run every value of the sweep, persisting after each value
///
/// Configuration and calibration errors abort the sweep; values finished
/// before the error keep their results. Failed repetitions are reported as a
/// shortfall and left for the next run.
pub fn run_sweep(
    base: &ModelParams,
    targets: &CalibrationTargets,
    countries: &[Country],
    config: &SweepConfig,
    dispatcher: &Dispatcher,
    stores: &mut Stores,
) -> Result<SweepReport> {
    let parameter = config.parameter;
    let mut reports = Vec::with_capacity(config.values.len());

    for &value in &config.values {
        let params = params_for_value(base, targets, parameter, value)?;
        tracing::info!(
            %parameter,
            value,
            lambda = params.lambda,
            epsilon_pibar = params.epsilon_pibar,
            "calibrated"
        );
        let scenario = Scenario::new(
            params,
            countries.to_vec(),
            config.periods,
            config.window,
            config.base_seed,
        )?;

        let report = run_value(&scenario, parameter, value, config.repetitions, dispatcher, stores)?;
        if report.shortfall() > 0 {
            tracing::warn!(
                %parameter,
                value,
                requested = report.requested,
                completed = report.completed,
                failures = report.failures,
                "fewer repetitions than requested"
            );
        } else {
            tracing::info!(%parameter, value, completed = report.completed, "value complete");
        }
        reports.push(report);
    }

    Ok(SweepReport {
        parameter,
        values: reports,
    })
}

fn run_value(
    scenario: &Scenario,
    parameter: SweptParameter,
    value: f64,
    repetitions: usize,
    dispatcher: &Dispatcher,
    stores: &mut Stores,
) -> Result<ValueReport> {
    let name = parameter.name();

    // Jobs left over from an interrupted run never reported back
    let stale = stores.ledger.clear(name, value);
    if !stale.is_empty() {
        tracing::info!(%parameter, value, jobs = stale.len(), "re-running outstanding jobs");
    }

    let done: HashSet<usize> = stores
        .results
        .completed_repetitions(name, value)
        .iter()
        .copied()
        .collect();
    let pending: Vec<usize> = (0..repetitions).filter(|r| !done.contains(r)).collect();
    tracing::info!(
        %parameter,
        value,
        pending = pending.len(),
        already_done = repetitions - pending.len(),
        "dispatching repetitions"
    );

    let mut handles: Vec<TaskHandle<WorldStats>> = Vec::with_capacity(pending.len());
    for &repetition in &pending {
        let handle = scenario.repetition(repetition).dispatch(dispatcher)?;
        stores.ledger.append(
            name,
            value,
            JobRecord {
                task_id: handle.id(),
                repetition,
            },
        );
        handles.push(handle);
    }
    stores.save()?;

    let task_ids: Vec<_> = handles.iter().map(TaskHandle::id).collect();
    let outcomes = dispatcher.collect(handles);

    let mut failures = 0;
    for ((&repetition, task_id), outcome) in pending.iter().zip(task_ids).zip(outcomes) {
        match outcome {
            Ok(stats) if stats.is_finite() => {
                stores.results.record(name, value, repetition, &stats);
            }
            Ok(stats) => {
                failures += 1;
                tracing::warn!(repetition, ?stats, "repetition produced non-finite statistics");
            }
            Err(failure) => {
                failures += 1;
                tracing::warn!(repetition, %failure, "repetition failed");
            }
        }
        stores.ledger.resolve(name, value, task_id);
    }
    stores.save()?;

    let completed = stores
        .results
        .completed_repetitions(name, value)
        .iter()
        .filter(|&&r| r < repetitions)
        .count();
    let summaries = stores
        .results
        .summary(name, value)
        .into_iter()
        .map(|(stat, summary)| (stat.to_string(), summary))
        .collect();

    Ok(ValueReport {
        value,
        requested: repetitions,
        completed,
        failures,
        summaries,
    })
}
