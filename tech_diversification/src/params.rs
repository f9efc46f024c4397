use serde::{Deserialize, Serialize};

use crate::calibration::{logseries_mean, theta_from_concentration};
use crate::error::{ModelError, Result};

/// What happens when a shock lands on the one-variety slot
///
/// A firm with a single variety has nothing left to merge into. `Absorb`
/// counts the shock and leaves the distribution alone, `Exit` removes that
/// slot's mass and shifts every other slot down by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroSlotShock {
    #[default]
    Absorb,
    Exit,
}

/// Model parameters shared by every economy of a scenario
///
/// Fields missing from a configuration file keep their default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    /// Step-up rate λ: arrival rate of new varieties per existing variety
    pub lambda: f64,
    /// Shock rate γ: arrival rate of variety-destroying shocks
    pub gamma: f64,
    /// Entry rate η
    pub eta: f64,
    /// Elasticity of substitution ε
    pub epsilon: f64,
    /// Elasticity of entry cost with respect to population, θ_N
    pub theta_n: f64,
    /// Elasticity of the entrant mass with respect to GDP, θ_m0
    pub theta_m0: f64,
    /// Profit-to-variety conversion ε·π̄
    pub epsilon_pibar: f64,
    /// Length of one simulated period in years
    pub dt: f64,
    /// Support of the variety distribution
    pub n_cap: usize,
    pub zero_slot_shock: ZeroSlotShock,
}

impl Default for ModelParams {
    fn default() -> Self {
        ModelParams {
            lambda: 0.12,        // gamma + 2% expected growth
            gamma: 0.10,         // Shock rate
            eta: 0.10,           // Entry rate
            epsilon: 3.0,        // Elasticity of substitution
            theta_n: 0.03,       // Population elasticity
            theta_m0: 0.03,      // Entrant mass elasticity
            epsilon_pibar: 1.0,  // Overwritten by calibration
            dt: 1.0,             // Annual periods
            n_cap: 900,          // Variety support
            zero_slot_shock: ZeroSlotShock::Absorb,
        }
    }
}

/// Per-period hazards, computed once per scenario
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepRates {
    pub lambda_dt: f64,
    pub gamma_dt: f64,
    pub eta_dt: f64,
}

/// Targets the profit conversion factor is calibrated against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationTargets {
    /// GDP per capita of the reference economy
    pub reference_gdp: f64,
    /// Growth-rate variance of the reference economy
    pub reference_variance: f64,
    /// Expected growth rate, λ - γ
    pub growth_target: f64,
}

impl Default for CalibrationTargets {
    fn default() -> Self {
        // USA, 1870
        CalibrationTargets {
            reference_gdp: 2444.644,
            reference_variance: 0.001534,
            growth_target: 0.02,
        }
    }
}

fn check(condition: bool, message: impl FnOnce() -> String) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(ModelError::Configuration(message()))
    }
}

impl ModelParams {
    /// Check every parameter's range and the entry-cost invariant
    pub fn validate(&self) -> Result<()> {
        let rates = [
            ("lambda", self.lambda),
            ("gamma", self.gamma),
            ("eta", self.eta),
            ("theta_N", self.theta_n),
            ("theta_m0", self.theta_m0),
        ];
        for (name, value) in rates {
            check(value.is_finite() && value >= 0.0, || {
                format!("{name} must be finite and non-negative, got {value}")
            })?;
        }
        check(self.epsilon.is_finite() && self.epsilon > 1.0, || {
            format!("epsilon must exceed 1, got {}", self.epsilon)
        })?;
        check(self.epsilon_pibar.is_finite() && self.epsilon_pibar > 0.0, || {
            format!("epsilon_pibar must be positive, got {}", self.epsilon_pibar)
        })?;
        check(self.dt.is_finite() && self.dt > 0.0, || {
            format!("dt must be positive, got {}", self.dt)
        })?;
        check(self.n_cap >= 1, || "n_cap must be at least 1".to_string())?;

        let lhs = 1.0 / (self.epsilon - 1.0) + self.theta_n;
        let rhs = 1.0 + self.theta_m0;
        check(lhs <= rhs, || {
            format!("1/(epsilon-1) + theta_N = {lhs} exceeds 1 + theta_m0 = {rhs}")
        })
    }

    pub fn step_rates(&self) -> StepRates {
        StepRates {
            lambda_dt: self.lambda * self.dt,
            gamma_dt: self.gamma * self.dt,
            eta_dt: self.eta * self.dt,
        }
    }

    /// Set λ from the growth target and fit ε·π̄ to the reference economy
    ///
    /// The reference economy's growth variance pins down the concentration of
    /// its firm-size distribution, hence its mean variety count; ε·π̄ is the
    /// GDP per variety.
    pub fn calibrated(mut self, targets: &CalibrationTargets) -> Result<Self> {
        check(self.gamma > 0.0, || {
            "calibration needs a positive gamma".to_string()
        })?;
        self.lambda = self.gamma + targets.growth_target;
        let theta = theta_from_concentration(targets.reference_variance / self.gamma)?;
        let nbar = logseries_mean(theta);
        self.epsilon_pibar = targets.reference_gdp / nbar;
        tracing::debug!(
            theta,
            nbar,
            epsilon_pibar = self.epsilon_pibar,
            "calibrated to reference economy"
        );
        Ok(self)
    }

    /// Elasticity of entrants with respect to GDP, `None` when entry is off
    pub fn zeta(&self) -> Option<f64> {
        if self.theta_m0 > 0.0 {
            Some(((2.0 - self.epsilon) / (self.epsilon - 1.0) + self.theta_n) / self.theta_m0)
        } else {
            None
        }
    }

    /// Number of periods averaged into one decade
    pub fn decade_len(&self) -> usize {
        ((10.0 / self.dt).round() as usize).max(1)
    }
}

/// Initial condition of one country
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Country {
    pub name: String,
    /// Initial GDP per capita
    pub initial_gdp: f64,
    pub population: f64,
}

impl Country {
    pub fn new(name: impl Into<String>, initial_gdp: f64, population: f64) -> Self {
        Country {
            name: name.into(),
            initial_gdp,
            population,
        }
    }

    pub fn validate(&self) -> Result<()> {
        check(self.initial_gdp.is_finite() && self.initial_gdp > 0.0, || {
            format!(
                "country {} needs a positive initial GDP, got {}",
                self.name, self.initial_gdp
            )
        })
    }
}
