pub mod analysis;
pub mod calibration;
pub mod config;
pub mod countries;
pub mod distribution;
pub mod economy;
pub mod error;
pub mod ledger;
pub mod params;
pub mod scenario;
pub mod shocks;
pub mod sweep;
pub mod system;
pub mod transition;

pub use analysis::{DecadeWindow, MeanStd, WorldGdp, WorldStats, STAT_NAMES};
pub use distribution::VarietyDistribution;
pub use economy::Economy;
pub use error::{ModelError, Result};
pub use params::{CalibrationTargets, Country, ModelParams, ZeroSlotShock};
pub use scenario::{Scenario, ScenarioRun};
pub use sweep::{SweepConfig, SweepReport, SweptParameter};
pub use system::EconomyAgent;

/// Events in the economy simulation
#[derive(Debug, Clone)]
pub enum Event {
    /// Record GDP and advance the distribution by one period
    Step { period: usize },
}

/// Trajectory of one simulated economy
#[derive(Debug, Clone)]
pub struct EconomyStats {
    pub country: String,
    pub periods_completed: usize,
    /// GDP per period, recorded before the period's step
    pub gdp_series: Vec<f64>,
    /// Shocks drawn over the run, including those that hit the one-variety slot
    pub shocks_drawn: usize,
    /// Total entrant mass added over the run
    pub entrant_mass: f64,
    pub final_mass: f64,
}

/// Combined stats enum for DES framework compatibility
#[derive(Debug, Clone)]
pub enum Stats {
    Economy(EconomyStats),
}
