use crate::calibration::logseries_pmf;
use crate::error::{ModelError, Result};
use crate::params::ZeroSlotShock;

/// Measure of firms by number of varieties held
///
/// Slot `k` holds the mass of firms with `k + 1` varieties. The length is
/// fixed for the lifetime of the distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct VarietyDistribution {
    mass: Vec<f64>,
}

impl VarietyDistribution {
    /// Wrap an explicit mass vector; entries must be finite and non-negative
    pub fn new(mass: Vec<f64>) -> Result<Self> {
        if mass.is_empty() {
            return Err(ModelError::configuration(
                "variety distribution needs at least one slot",
            ));
        }
        if let Some((slot, value)) = mass
            .iter()
            .enumerate()
            .find(|(_, m)| !m.is_finite() || **m < 0.0)
        {
            return Err(ModelError::configuration(format!(
                "variety distribution slot {slot} holds invalid mass {value}"
            )));
        }
        Ok(VarietyDistribution { mass })
    }

    /// A single unit of firms, each with one variety
    pub fn unit(n_cap: usize) -> Self {
        let mut mass = vec![0.0; n_cap.max(1)];
        mass[0] = 1.0;
        VarietyDistribution { mass }
    }

    /// Logarithmic series over 1..=n_cap varieties, scaled to `firm_mass`
    ///
    /// Mass beyond the support is dropped, not folded into the last slot.
    pub fn from_logseries(n_cap: usize, theta: f64, firm_mass: f64) -> Self {
        let mass = (1..=n_cap.max(1))
            .map(|k| logseries_pmf(k, theta) * firm_mass)
            .collect();
        VarietyDistribution { mass }
    }

    pub fn len(&self) -> usize {
        self.mass.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mass.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.mass
    }

    pub fn total_mass(&self) -> f64 {
        self.mass.iter().sum()
    }

    /// Total number of (firm, variety) pairs
    ///
    /// Summing the reversed cumulative sum counts a firm with n varieties once
    /// for every threshold 1..=n it clears.
    pub fn total_varieties(&self) -> f64 {
        self.mass
            .iter()
            .rev()
            .scan(0.0, |above, &m| {
                *above += m;
                Some(*above)
            })
            .sum()
    }

    /// GDP: every variety earns the profit conversion constant ε·π̄
    pub fn gdp(&self, epsilon_pibar: f64) -> f64 {
        self.total_varieties() * epsilon_pibar
    }

    /// Add entrants jumping from zero to one variety
    pub fn add_entrants(&mut self, mass: f64) {
        self.mass[0] += mass;
    }

    /// One firm at `slot` loses a variety and merges into the slot below
    ///
    /// Mass above the shocked slot shifts down by one and a zero enters at
    /// the top, so the length is unchanged. A slot outside the support is
    /// ignored.
    pub fn apply_shock(&mut self, slot: usize, zero_slot: ZeroSlotShock) {
        let n = self.mass.len();
        if slot >= n {
            return;
        }
        if slot == 0 {
            match zero_slot {
                ZeroSlotShock::Absorb => return,
                ZeroSlotShock::Exit => self.mass.copy_within(1.., 0),
            }
        } else {
            self.mass[slot - 1] += self.mass[slot];
            self.mass.copy_within(slot + 1.., slot);
        }
        self.mass[n - 1] = 0.0;
    }

    pub(crate) fn from_raw(mass: Vec<f64>) -> Self {
        VarietyDistribution { mass }
    }
}
