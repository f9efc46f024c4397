//! Stores that survive process restarts
//!
//! The job ledger remembers which repetitions were submitted but never
//! harvested, the result store keeps one observation per statistic per
//! completed repetition. Both are plain JSON files keyed by swept parameter
//! and swept value.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use des::parallel::TaskId;
use serde::{Deserialize, Serialize};

use crate::analysis::{MeanStd, WorldStats, STAT_NAMES};
use crate::error::Result;

/// Map key for a swept value
pub fn value_key(value: f64) -> String {
    format!("{value}")
}

/// A submitted repetition whose result has not been harvested yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub task_id: TaskId,
    pub repetition: usize,
}

/// (parameter, value) → outstanding jobs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobLedger {
    jobs: BTreeMap<String, BTreeMap<String, Vec<JobRecord>>>,
}

impl JobLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A missing file is an empty ledger
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json(path.as_ref(), self)
    }

    pub fn append(&mut self, parameter: &str, value: f64, record: JobRecord) {
        self.jobs
            .entry(parameter.to_string())
            .or_default()
            .entry(value_key(value))
            .or_default()
            .push(record);
    }

    /// Forget a job once its outcome has been harvested
    pub fn resolve(&mut self, parameter: &str, value: f64, task_id: TaskId) -> Option<JobRecord> {
        let key = value_key(value);
        let records = self.jobs.get_mut(parameter)?.get_mut(&key)?;
        let position = records.iter().position(|r| r.task_id == task_id)?;
        let record = records.remove(position);
        if records.is_empty() {
            if let Some(values) = self.jobs.get_mut(parameter) {
                values.remove(&key);
            }
        }
        Some(record)
    }

    pub fn outstanding(&self, parameter: &str, value: f64) -> &[JobRecord] {
        self.jobs
            .get(parameter)
            .and_then(|values| values.get(&value_key(value)))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Drop every outstanding job of one value
    pub fn clear(&mut self, parameter: &str, value: f64) -> Vec<JobRecord> {
        self.jobs
            .get_mut(parameter)
            .and_then(|values| values.remove(&value_key(value)))
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.values().all(BTreeMap::is_empty)
    }
}

/// Observations of one swept value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueResults {
    pub value: f64,
    /// Completed repetitions, in the order they were recorded
    pub repetitions: Vec<usize>,
    /// statistic → one observation per completed repetition
    pub observations: BTreeMap<String, Vec<f64>>,
}

/// (parameter, value, statistic) → observations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultStore {
    /// RFC 3339 time of the last recorded observation
    #[serde(default)]
    pub updated_at: Option<String>,
    results: BTreeMap<String, BTreeMap<String, ValueResults>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A missing file is an empty store
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json(path.as_ref(), self)
    }

    /// Record one repetition; recording the same repetition twice is a no-op
    pub fn record(&mut self, parameter: &str, value: f64, repetition: usize, stats: &WorldStats) -> bool {
        let entry = self
            .results
            .entry(parameter.to_string())
            .or_default()
            .entry(value_key(value))
            .or_insert_with(|| ValueResults {
                value,
                ..ValueResults::default()
            });
        if entry.repetitions.contains(&repetition) {
            return false;
        }
        entry.repetitions.push(repetition);
        for (name, observation) in stats.values() {
            entry
                .observations
                .entry(name.to_string())
                .or_default()
                .push(observation);
        }
        self.updated_at = Some(chrono::Utc::now().to_rfc3339());
        true
    }

    fn entry(&self, parameter: &str, value: f64) -> Option<&ValueResults> {
        self.results.get(parameter)?.get(&value_key(value))
    }

    pub fn observations(&self, parameter: &str, value: f64, stat: &str) -> &[f64] {
        self.entry(parameter, value)
            .and_then(|entry| entry.observations.get(stat))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn completed_repetitions(&self, parameter: &str, value: f64) -> &[usize] {
        self.entry(parameter, value)
            .map(|entry| entry.repetitions.as_slice())
            .unwrap_or(&[])
    }

    pub fn parameters(&self) -> Vec<&str> {
        self.results.keys().map(String::as_str).collect()
    }

    /// Swept values of a parameter in ascending order
    pub fn values(&self, parameter: &str) -> Vec<f64> {
        let mut values: Vec<f64> = self
            .results
            .get(parameter)
            .map(|entries| entries.values().map(|e| e.value).collect())
            .unwrap_or_default();
        values.sort_by(f64::total_cmp);
        values
    }

    /// Mean and standard deviation of every statistic with observations
    pub fn summary(&self, parameter: &str, value: f64) -> Vec<(&'static str, MeanStd)> {
        STAT_NAMES
            .iter()
            .filter_map(|&stat| {
                MeanStd::from_values(self.observations(parameter, value, stat)).map(|s| (stat, s))
            })
            .collect()
    }

    /// One row per (parameter, value, statistic)
    pub fn write_summary_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut wtr = csv::Writer::from_path(path)?;
        wtr.write_record(["parameter", "value", "statistic", "count", "mean", "std", "min", "max"])?;
        for parameter in self.parameters() {
            for value in self.values(parameter) {
                for (stat, summary) in self.summary(parameter, value) {
                    wtr.write_record(&[
                        parameter.to_string(),
                        value.to_string(),
                        stat.to_string(),
                        summary.count.to_string(),
                        summary.mean.to_string(),
                        summary.std.to_string(),
                        summary.min.to_string(),
                        summary.max.to_string(),
                    ])?;
                }
            }
        }
        wtr.flush()?;
        Ok(())
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

/// Ledger and result store, optionally backed by files
#[derive(Debug, Default)]
pub struct Stores {
    pub ledger: JobLedger,
    pub results: ResultStore,
    ledger_path: Option<PathBuf>,
    results_path: Option<PathBuf>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load both stores, starting empty where a file does not exist yet
    pub fn open(ledger_path: impl Into<PathBuf>, results_path: impl Into<PathBuf>) -> Result<Self> {
        let ledger_path = ledger_path.into();
        let results_path = results_path.into();
        Ok(Stores {
            ledger: JobLedger::load(&ledger_path)?,
            results: ResultStore::load(&results_path)?,
            ledger_path: Some(ledger_path),
            results_path: Some(results_path),
        })
    }

    pub fn save(&self) -> Result<()> {
        if let Some(path) = &self.ledger_path {
            self.ledger.save(path)?;
        }
        if let Some(path) = &self.results_path {
            self.results.save(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(seed: f64) -> WorldStats {
        WorldStats {
            cross_section_beta: -0.1 * seed,
            time_series_beta: -0.2 * seed,
            early_dispersion: 0.5 + seed,
            late_dispersion: 0.9 + seed,
            average_skewness: 0.01 * seed,
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tech_div_{}_{}", std::process::id(), name))
    }

    #[test]
    fn ledger_append_and_resolve() {
        let mut ledger = JobLedger::new();
        ledger.append("gamma", 0.1, JobRecord { task_id: 7, repetition: 0 });
        ledger.append("gamma", 0.1, JobRecord { task_id: 8, repetition: 1 });
        ledger.append("gamma", 0.2, JobRecord { task_id: 9, repetition: 0 });

        assert_eq!(ledger.outstanding("gamma", 0.1).len(), 2);
        assert_eq!(
            ledger.resolve("gamma", 0.1, 7),
            Some(JobRecord { task_id: 7, repetition: 0 })
        );
        assert_eq!(ledger.resolve("gamma", 0.1, 7), None);
        assert_eq!(ledger.outstanding("gamma", 0.1), &[JobRecord { task_id: 8, repetition: 1 }]);
        assert!(ledger.outstanding("eta", 0.1).is_empty());

        ledger.resolve("gamma", 0.1, 8);
        ledger.clear("gamma", 0.2);
        assert!(ledger.is_empty());
    }

    #[test]
    fn ledger_survives_a_restart() {
        let path = temp_path("ledger.json");
        let mut ledger = JobLedger::new();
        ledger.append("eta", 0.05, JobRecord { task_id: 3, repetition: 4 });
        ledger.save(&path).unwrap();

        let reloaded = JobLedger::load(&path).unwrap();
        assert_eq!(reloaded, ledger);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_files_load_empty() {
        let path = temp_path("does_not_exist.json");
        assert!(JobLedger::load(&path).unwrap().is_empty());
        assert!(ResultStore::load(&path).unwrap().parameters().is_empty());
    }

    #[test]
    fn store_records_each_repetition_once() {
        let mut store = ResultStore::new();
        assert!(store.record("gamma", 0.1, 0, &stats(1.0)));
        assert!(store.record("gamma", 0.1, 1, &stats(2.0)));
        assert!(!store.record("gamma", 0.1, 1, &stats(3.0)));

        assert_eq!(store.completed_repetitions("gamma", 0.1), &[0, 1]);
        assert_eq!(store.observations("gamma", 0.1, "early dispersion"), &[1.5, 2.5]);
        assert!(store.updated_at.is_some());
    }

    #[test]
    fn summary_follows_stat_order() {
        let mut store = ResultStore::new();
        store.record("epsilon", 3.0, 0, &stats(1.0));
        store.record("epsilon", 3.0, 1, &stats(3.0));

        let summary = store.summary("epsilon", 3.0);
        let names: Vec<&str> = summary.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, STAT_NAMES.to_vec());
        approx::assert_relative_eq!(summary[2].1.mean, 2.5);
        approx::assert_relative_eq!(summary[2].1.std, 1.0);
        assert!(store.summary("epsilon", 5.0).is_empty());
    }

    #[test]
    fn values_sorted_numerically() {
        let mut store = ResultStore::new();
        for value in [0.2, 0.05, 0.15, 0.1] {
            store.record("gamma", value, 0, &stats(value));
        }
        assert_eq!(store.values("gamma"), vec![0.05, 0.1, 0.15, 0.2]);
    }

    #[test]
    fn store_round_trips_through_json_and_csv() {
        let json_path = temp_path("results.json");
        let csv_path = temp_path("summary.csv");
        let mut store = ResultStore::new();
        store.record("gamma", 0.1, 0, &stats(1.0));
        store.save(&json_path).unwrap();
        assert_eq!(ResultStore::load(&json_path).unwrap(), store);

        store.write_summary_csv(&csv_path).unwrap();
        let mut reader = csv::Reader::from_path(&csv_path).unwrap();
        assert_eq!(reader.records().count(), STAT_NAMES.len());

        fs::remove_file(&json_path).unwrap();
        fs::remove_file(&csv_path).unwrap();
    }

    #[test]
    fn in_memory_stores_save_nothing() {
        let mut stores = Stores::in_memory();
        stores.results.record("dummy", 1.0, 0, &stats(1.0));
        assert!(stores.save().is_ok());
    }
}
