use std::sync::Arc;

use des::parallel::{Dispatcher, TaskHandle};

use crate::analysis::{DecadeWindow, WorldGdp, WorldStats};
use crate::economy::Economy;
use crate::error::{ModelError, Result};
use crate::params::{Country, ModelParams};
use crate::transition::TransitionMatrix;

/// Seeds of sibling economies are spaced this far apart
const COUNTRY_SEED_STRIDE: u64 = 1000;

/// A parameter set applied to a list of countries
///
/// Every repetition of a scenario simulates the same countries under the same
/// parameters with a different seed. The step-up kernel only depends on the
/// parameters, so it is built once and shared by every economy.
#[derive(Debug, Clone)]
pub struct Scenario {
    params: ModelParams,
    transition: Arc<TransitionMatrix>,
    countries: Vec<Country>,
    periods: usize,
    window: DecadeWindow,
    base_seed: u64,
}

impl Scenario {
    /// Validate everything up front so a bad scenario never dispatches a task
    pub fn new(
        params: ModelParams,
        countries: Vec<Country>,
        periods: usize,
        window: DecadeWindow,
        base_seed: u64,
    ) -> Result<Self> {
        params.validate()?;
        if countries.is_empty() {
            return Err(ModelError::configuration("scenario needs at least one country"));
        }
        for country in &countries {
            country.validate()?;
        }
        window.validate()?;
        window.fits(periods)?;

        let transition = Arc::new(TransitionMatrix::new(
            params.n_cap,
            params.step_rates().lambda_dt,
        ));
        Ok(Scenario {
            params,
            transition,
            countries,
            periods,
            window,
            base_seed,
        })
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    pub fn countries(&self) -> &[Country] {
        &self.countries
    }

    pub fn periods(&self) -> usize {
        self.periods
    }

    pub fn window(&self) -> DecadeWindow {
        self.window
    }

    /// Independent copy for one repetition
    pub fn repetition(&self, index: usize) -> ScenarioRun {
        ScenarioRun {
            repetition: index,
            seed: self.base_seed.wrapping_add(index as u64),
            params: self.params.clone(),
            transition: Arc::clone(&self.transition),
            countries: self.countries.clone(),
            periods: self.periods,
            window: self.window,
        }
    }

    pub fn repetitions(&self, k: usize) -> Vec<ScenarioRun> {
        (0..k).map(|index| self.repetition(index)).collect()
    }
}

/// One repetition of a scenario, owning its own copy of every input
#[derive(Debug, Clone)]
pub struct ScenarioRun {
    pub repetition: usize,
    pub seed: u64,
    params: ModelParams,
    transition: Arc<TransitionMatrix>,
    countries: Vec<Country>,
    periods: usize,
    window: DecadeWindow,
}

impl ScenarioRun {
    pub fn country_seed(&self, index: usize) -> u64 {
        self.seed
            .wrapping_mul(COUNTRY_SEED_STRIDE)
            .wrapping_add(index as u64)
    }

    pub fn economies(&self) -> Result<Vec<Economy>> {
        self.countries
            .iter()
            .map(|country| {
                Economy::with_transition(
                    self.params.clone(),
                    country.clone(),
                    Arc::clone(&self.transition),
                )
            })
            .collect()
    }

    /// Fan out one simulation per country, fan in one aggregation
    ///
    /// The aggregation starts only after every simulation has finished and
    /// sees their series in country order. Each simulation task builds its
    /// own economy around the shared step-up kernel.
    pub fn dispatch(&self, dispatcher: &Dispatcher) -> Result<TaskHandle<WorldStats>> {
        let inputs: Vec<(Country, u64)> = self
            .countries
            .iter()
            .enumerate()
            .map(|(index, country)| (country.clone(), self.country_seed(index)))
            .collect();

        let params = self.params.clone();
        let transition = Arc::clone(&self.transition);
        let periods = self.periods;
        let simulations = dispatcher.submit(
            move |(country, seed): (Country, u64)| -> Result<Vec<f64>> {
                let economy =
                    Economy::with_transition(params.clone(), country, Arc::clone(&transition))?;
                economy.gdp_series(periods, seed)
            },
            inputs,
        );

        let window = self.window;
        let repetition = self.repetition;
        let aggregation = dispatcher.submit_dependent(
            move |series: Vec<Vec<f64>>| -> Result<WorldStats> {
                let world = WorldGdp::from_columns(series)?;
                let stats = world.stats(&window)?;
                tracing::debug!(
                    repetition,
                    countries = world.countries(),
                    cross_section_beta = stats.cross_section_beta,
                    "world aggregated"
                );
                Ok(stats)
            },
            simulations,
        );
        Ok(aggregation)
    }

    /// Dispatch and block until the statistics are in
    pub fn run(&self, dispatcher: &Dispatcher) -> Result<WorldStats> {
        let handle = self.dispatch(dispatcher)?;
        match dispatcher.collect(vec![handle]).pop() {
            Some(outcome) => Ok(outcome?),
            None => Err(ModelError::numerical("aggregation produced no outcome")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ModelParams {
        ModelParams {
            n_cap: 60,
            ..ModelParams::default()
        }
        .calibrated(&Default::default())
        .unwrap()
    }

    fn countries() -> Vec<Country> {
        vec![
            Country::new("A", 3000.0, 40.0),
            Country::new("B", 1200.0, 10.0),
            Country::new("C", 600.0, 25.0),
        ]
    }

    fn window() -> DecadeWindow {
        DecadeWindow::new(5, 25, 5).unwrap()
    }

    #[test]
    fn invalid_params_rejected_before_dispatch() {
        let bad = ModelParams {
            epsilon: 1.1,
            ..params()
        };
        let result = Scenario::new(bad, countries(), 30, window(), 0);
        assert!(matches!(result, Err(ModelError::Configuration(_))));
    }

    #[test]
    fn window_must_fit_the_horizon() {
        assert!(Scenario::new(params(), countries(), 25, window(), 0).is_err());
        assert!(Scenario::new(params(), Vec::new(), 30, window(), 0).is_err());
    }

    #[test]
    fn repetitions_are_independent_copies() {
        let scenario = Scenario::new(params(), countries(), 30, window(), 100).unwrap();
        let runs = scenario.repetitions(4);
        assert_eq!(runs.len(), 4);
        let seeds: Vec<u64> = runs.iter().map(|r| r.seed).collect();
        assert_eq!(seeds, vec![100, 101, 102, 103]);
        assert_ne!(runs[0].country_seed(1), runs[1].country_seed(1));
        assert_ne!(runs[0].country_seed(0), runs[0].country_seed(1));
    }

    #[test]
    fn aggregation_sees_series_in_country_order() {
        let dispatcher = Dispatcher::builder().num_threads(3).build().unwrap();
        let scenario = Scenario::new(params(), countries(), 30, window(), 7).unwrap();
        let run = scenario.repetition(2);

        let dispatched = run.run(&dispatcher).unwrap();

        let series: Vec<Vec<f64>> = run
            .economies()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(i, economy)| economy.gdp_series(30, run.country_seed(i)).unwrap())
            .collect();
        let sequential = WorldGdp::from_columns(series)
            .unwrap()
            .stats(&window())
            .unwrap();

        assert_eq!(dispatched, sequential);
    }

    #[test]
    fn every_economy_shares_one_kernel() {
        let scenario = Scenario::new(params(), countries(), 30, window(), 3).unwrap();
        let first = scenario.repetition(0).economies().unwrap();
        let second = scenario.repetition(5).economies().unwrap();

        for economy in first.iter().chain(&second) {
            assert!(Arc::ptr_eq(economy.transition(), &scenario.transition));
        }
    }

    #[test]
    fn same_repetition_same_statistics() {
        let dispatcher = Dispatcher::builder().num_threads(2).build().unwrap();
        let scenario = Scenario::new(params(), countries(), 30, window(), 11).unwrap();
        let first = scenario.repetition(0).run(&dispatcher).unwrap();
        let again = scenario.repetition(0).run(&dispatcher).unwrap();
        assert_eq!(first, again);
        assert!(first.is_finite());
    }
}
