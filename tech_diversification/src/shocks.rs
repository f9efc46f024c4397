use rand::Rng;
use rand_distr::{Binomial, Distribution};

use crate::error::{ModelError, Result};

/// Draws the slots hit by variety-destroying shocks in one period
///
/// The number of shocks is Binomial(N, 1 - e^{-γΔt}). Slots are then drawn
/// one at a time from a pool that loses one slot per draw, matching a
/// distribution whose occupied support shrinks as shocks collapse it.
#[derive(Debug, Clone)]
pub struct ShockProcess {
    n_cap: usize,
    probability: f64,
    count: Option<Binomial>,
}

impl ShockProcess {
    pub fn new(n_cap: usize, gamma_dt: f64) -> Result<Self> {
        let probability = -(-gamma_dt).exp_m1();
        let count = if probability > 0.0 {
            Some(Binomial::new(n_cap as u64, probability).map_err(|e| {
                ModelError::configuration(format!(
                    "invalid shock probability {probability}: {e}"
                ))
            })?)
        } else {
            None
        };
        Ok(ShockProcess {
            n_cap,
            probability,
            count,
        })
    }

    /// Per-slot probability of a shock in one period
    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn draw<R: Rng>(&self, rng: &mut R) -> Vec<usize> {
        let count = self
            .count
            .as_ref()
            .map_or(0, |binomial| binomial.sample(rng) as usize);

        let mut pool = self.n_cap;
        let mut shocks = Vec::with_capacity(count);
        for _ in 0..count {
            if pool == 0 {
                break;
            }
            shocks.push(rng.random_range(0..pool));
            pool -= 1;
        }
        shocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn no_shocks_without_hazard() {
        let process = ShockProcess::new(100, 0.0).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            assert!(process.draw(&mut rng).is_empty());
        }
    }

    #[test]
    fn pool_shrinks_after_every_draw() {
        let process = ShockProcess::new(30, 0.5).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            for (i, slot) in process.draw(&mut rng).into_iter().enumerate() {
                assert!(slot < 30 - i);
            }
        }
    }

    #[test]
    fn saturated_hazard_shocks_every_slot() {
        // 1 - e^{-1000} rounds to 1, so every slot is hit
        let process = ShockProcess::new(10, 1000.0).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let shocks = process.draw(&mut rng);
        assert_eq!(shocks.len(), 10);
        assert_eq!(shocks[9], 0, "last draw comes from a pool of one");
    }

    #[test]
    fn mean_count_matches_binomial() {
        let process = ShockProcess::new(200, 0.1).unwrap();
        let mut rng = StdRng::seed_from_u64(99);
        let draws = 2000;
        let total: usize = (0..draws).map(|_| process.draw(&mut rng).len()).sum();
        let expected = 200.0 * process.probability();
        let observed = total as f64 / draws as f64;
        assert!((observed - expected).abs() < 1.0, "observed {observed}, expected {expected}");
    }

    #[test]
    fn same_seed_same_shocks() {
        let process = ShockProcess::new(50, 0.2).unwrap();
        let mut rng1 = StdRng::seed_from_u64(123);
        let mut rng2 = StdRng::seed_from_u64(123);
        for _ in 0..20 {
            assert_eq!(process.draw(&mut rng1), process.draw(&mut rng2));
        }
    }
}
