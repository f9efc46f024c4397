use crate::distribution::VarietyDistribution;

/// Step-up kernel: every firm draws a Poisson number of new varieties
///
/// Column `n` (firms holding `n + 1` varieties) spreads its mass over rows
/// `n..N`. The Poisson mean `(e^{λΔt} - 1)(n + 1)` grows with the firm's
/// current variety count, and each column is renormalised over the reachable
/// rows so no mass leaves the support.
#[derive(Debug, Clone)]
pub struct TransitionMatrix {
    /// `columns[n][k]` is the probability of moving from slot `n` to `n + k`
    columns: Vec<Vec<f64>>,
}

fn poisson_column(mean: f64, len: usize, ln_factorial: &[f64]) -> Vec<f64> {
    if mean <= 0.0 {
        let mut column = vec![0.0; len];
        column[0] = 1.0;
        return column;
    }
    // Log space keeps large means from underflowing e^{-mean}
    let ln_mean = mean.ln();
    let log_pmf: Vec<f64> = (0..len)
        .map(|k| -mean + k as f64 * ln_mean - ln_factorial[k])
        .collect();
    let peak = log_pmf.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut column: Vec<f64> = log_pmf.iter().map(|lp| (lp - peak).exp()).collect();
    let total: f64 = column.iter().sum();
    for p in &mut column {
        *p /= total;
    }
    column
}

impl TransitionMatrix {
    pub fn new(n_cap: usize, lambda_dt: f64) -> Self {
        let n_cap = n_cap.max(1);
        let mut ln_factorial = Vec::with_capacity(n_cap);
        let mut acc = 0.0;
        ln_factorial.push(acc);
        for k in 1..n_cap {
            acc += (k as f64).ln();
            ln_factorial.push(acc);
        }

        let growth = lambda_dt.exp_m1();
        let columns = (0..n_cap)
            .map(|n| poisson_column(growth * (n + 1) as f64, n_cap - n, &ln_factorial))
            .collect();
        TransitionMatrix { columns }
    }

    pub fn size(&self) -> usize {
        self.columns.len()
    }

    /// Probability of moving from slot `from` to slot `to`
    pub fn get(&self, to: usize, from: usize) -> f64 {
        if to < from {
            return 0.0;
        }
        self.columns
            .get(from)
            .and_then(|column| column.get(to - from))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn column_sum(&self, from: usize) -> f64 {
        self.columns.get(from).map_or(0.0, |c| c.iter().sum())
    }

    /// Push every firm through the kernel
    pub fn apply(&self, distribution: &VarietyDistribution) -> VarietyDistribution {
        let n = self.size();
        let mut next = vec![0.0; n];
        for (from, (&mass, column)) in distribution
            .as_slice()
            .iter()
            .zip(&self.columns)
            .enumerate()
        {
            if mass == 0.0 {
                continue;
            }
            for (offset, p) in column.iter().enumerate() {
                next[from + offset] += p * mass;
            }
        }
        VarietyDistribution::from_raw(next)
    }
}
