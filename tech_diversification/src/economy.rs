use std::sync::Arc;

use des::EventLoop;
use rand::Rng;

use crate::calibration::theta_from_mean;
use crate::distribution::VarietyDistribution;
use crate::error::{ModelError, Result};
use crate::params::{Country, ModelParams, StepRates};
use crate::shocks::ShockProcess;
use crate::system::EconomyAgent;
use crate::transition::TransitionMatrix;
use crate::{EconomyStats, Event, Stats};

/// Initial mass of firms
pub const INITIAL_FIRM_MASS: f64 = 1.0;

/// What happened to the distribution during one period
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodOutcome {
    pub entrant_mass: f64,
    pub shocks_drawn: usize,
}

/// One country's firm-variety distribution and the dynamics acting on it
///
/// The seed distribution is never mutated: every simulation works on its own
/// copy, so repeated calls with the same seed give the same series.
#[derive(Debug, Clone)]
pub struct Economy {
    params: ModelParams,
    country: Country,
    rates: StepRates,
    distribution: VarietyDistribution,
    transition: Arc<TransitionMatrix>,
    shocks: ShockProcess,
    zeta: Option<f64>,
}

impl Economy {
    /// Build an economy whose initial distribution matches the country's GDP
    ///
    /// The mean variety count GDP₀ / (ε·π̄ · M₀) fixes the logarithmic-series
    /// shape of the initial distribution.
    pub fn new(params: ModelParams, country: Country) -> Result<Self> {
        let transition = Arc::new(TransitionMatrix::new(
            params.n_cap,
            params.step_rates().lambda_dt,
        ));
        Self::with_transition(params, country, transition)
    }

    /// Like [`Economy::new`], reusing a step-up kernel built for the same
    /// `n_cap` and λΔt
    pub fn with_transition(
        params: ModelParams,
        country: Country,
        transition: Arc<TransitionMatrix>,
    ) -> Result<Self> {
        params.validate()?;
        country.validate()?;
        let nbar = country.initial_gdp / params.epsilon_pibar / INITIAL_FIRM_MASS;
        let theta = theta_from_mean(nbar)?;
        let distribution =
            VarietyDistribution::from_logseries(params.n_cap, theta, INITIAL_FIRM_MASS);
        Self::assemble(params, country, distribution, transition)
    }

    /// Build an economy from an explicit initial distribution
    pub fn with_distribution(
        params: ModelParams,
        country: Country,
        distribution: VarietyDistribution,
    ) -> Result<Self> {
        params.validate()?;
        if distribution.len() != params.n_cap {
            return Err(ModelError::configuration(format!(
                "initial distribution has {} slots, n_cap is {}",
                distribution.len(),
                params.n_cap
            )));
        }
        let transition = Arc::new(TransitionMatrix::new(
            params.n_cap,
            params.step_rates().lambda_dt,
        ));
        Self::assemble(params, country, distribution, transition)
    }

    fn assemble(
        params: ModelParams,
        country: Country,
        distribution: VarietyDistribution,
        transition: Arc<TransitionMatrix>,
    ) -> Result<Self> {
        if transition.size() != params.n_cap {
            return Err(ModelError::configuration(format!(
                "transition matrix covers {} slots, n_cap is {}",
                transition.size(),
                params.n_cap
            )));
        }
        let rates = params.step_rates();
        let shocks = ShockProcess::new(params.n_cap, rates.gamma_dt)?;
        let zeta = params.zeta();
        Ok(Economy {
            params,
            country,
            rates,
            distribution,
            transition,
            shocks,
            zeta,
        })
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    pub fn country(&self) -> &Country {
        &self.country
    }

    pub fn distribution(&self) -> &VarietyDistribution {
        &self.distribution
    }

    pub fn transition(&self) -> &Arc<TransitionMatrix> {
        &self.transition
    }

    pub fn entry_enabled(&self) -> bool {
        self.zeta.is_some()
    }

    pub fn gdp(&self, distribution: &VarietyDistribution) -> f64 {
        distribution.gdp(self.params.epsilon_pibar)
    }

    /// Mass of entrants jumping from zero to one variety this period
    ///
    /// ln m₀ = -ln(ε·π̄)/θ_m0 + ζ ln(GDP/ε·π̄); a share 1 - e^{-ηΔt} of the
    /// potential entrants succeeds.
    pub fn entrants(&self, distribution: &VarietyDistribution) -> f64 {
        let Some(zeta) = self.zeta else {
            return 0.0;
        };
        let epsilon_pibar = self.params.epsilon_pibar;
        let gdp = distribution.gdp(epsilon_pibar);
        // An empty economy attracts no entrants
        if gdp <= 0.0 {
            return 0.0;
        }
        let log_m0 = -epsilon_pibar.ln() / self.params.theta_m0 + zeta * (gdp / epsilon_pibar).ln();
        let success = -(-self.rates.eta_dt).exp_m1();
        success * log_m0.exp().max(0.0)
    }

    /// Advance `distribution` by one period: step-up, entry, then shocks
    pub fn step<R: Rng>(&self, distribution: &mut VarietyDistribution, rng: &mut R) -> PeriodOutcome {
        *distribution = self.transition.apply(distribution);

        let entrant_mass = self.entrants(distribution);
        distribution.add_entrants(entrant_mass);

        let shocks = self.shocks.draw(rng);
        for &slot in &shocks {
            distribution.apply_shock(slot, self.params.zero_slot_shock);
        }

        PeriodOutcome {
            entrant_mass,
            shocks_drawn: shocks.len(),
        }
    }

    /// Run the economy for `periods` periods on a fresh copy of its distribution
    pub fn simulate(&self, periods: usize, seed: u64) -> Result<EconomyStats> {
        let agent = EconomyAgent::new(self.clone(), periods, seed);
        let initial_events = if periods > 0 {
            vec![(0, Event::Step { period: 0 })]
        } else {
            Vec::new()
        };
        let mut event_loop = EventLoop::new(initial_events, vec![Box::new(agent)]);
        event_loop.run(periods.saturating_sub(1));

        let Some(Stats::Economy(stats)) = event_loop.stats().into_iter().next() else {
            return Err(ModelError::numerical(format!(
                "economy {} produced no statistics",
                self.country.name
            )));
        };

        if let Some((period, gdp)) = stats
            .gdp_series
            .iter()
            .enumerate()
            .find(|(_, gdp)| !gdp.is_finite())
        {
            return Err(ModelError::numerical(format!(
                "economy {} has non-finite GDP {gdp} in period {period}",
                self.country.name
            )));
        }
        Ok(stats)
    }

    /// GDP per period, recorded before each period's step
    pub fn gdp_series(&self, periods: usize, seed: u64) -> Result<Vec<f64>> {
        Ok(self.simulate(periods, seed)?.gdp_series)
    }
}
