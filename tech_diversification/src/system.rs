use des::{Agent, Response};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::distribution::VarietyDistribution;
use crate::economy::Economy;
use crate::{EconomyStats, Event, Stats};

/// Drives one economy through the event loop, one `Step` event per period
///
/// The agent owns a private copy of the distribution and its own RNG, so the
/// whole trajectory is a function of the economy and the seed.
pub struct EconomyAgent {
    economy: Economy,
    distribution: VarietyDistribution,
    rng: StdRng,
    periods: usize,
    gdp_series: Vec<f64>,
    shocks_drawn: usize,
    entrant_mass: f64,
}

impl EconomyAgent {
    pub fn new(economy: Economy, periods: usize, seed: u64) -> Self {
        let distribution = economy.distribution().clone();
        EconomyAgent {
            economy,
            distribution,
            rng: StdRng::seed_from_u64(seed),
            periods,
            gdp_series: Vec::with_capacity(periods),
            shocks_drawn: 0,
            entrant_mass: 0.0,
        }
    }

    /// Record this period's GDP, then advance the distribution
    fn step(&mut self) {
        self.gdp_series.push(self.economy.gdp(&self.distribution));
        let outcome = self.economy.step(&mut self.distribution, &mut self.rng);
        self.shocks_drawn += outcome.shocks_drawn;
        self.entrant_mass += outcome.entrant_mass;
    }
}

impl Agent<Event, Stats> for EconomyAgent {
    fn act(&mut self, _current_t: usize, data: &Event) -> Response<Event, Stats> {
        match data {
            Event::Step { period } => {
                self.step();

                let next = period + 1;
                if next < self.periods {
                    Response::event(next, Event::Step { period: next })
                } else {
                    Response::new()
                }
            }
        }
    }

    fn stats(&self) -> Stats {
        Stats::Economy(EconomyStats {
            country: self.economy.country().name.clone(),
            periods_completed: self.gdp_series.len(),
            gdp_series: self.gdp_series.clone(),
            shocks_drawn: self.shocks_drawn,
            entrant_mass: self.entrant_mass,
            final_mass: self.distribution.total_mass(),
        })
    }
}
