//! Outcome counters and post-run sequence analysis.

use serde::{Deserialize, Serialize};

/// Chi-squared critical value at 5% significance, 1 degree of freedom.
const CHI_SQUARED_CRITICAL_DF1: f64 = 3.841;

/// Incremental counter over toss outcomes. Covers both the coin ({0, 1}) and
/// qutrit ({0, 1, 2}) variants; unused buckets just stay at zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TossTally {
    counts: [usize; 3],
    total: usize,
}

impl TossTally {
    pub fn new() -> Self {
        TossTally::default()
    }

    pub fn record(&mut self, outcome: u8) {
        debug_assert!(outcome < 3, "outcome out of range: {outcome}");
        self.counts[outcome as usize] += 1;
        self.total += 1;
    }

    pub fn count(&self, outcome: u8) -> usize {
        self.counts[outcome as usize]
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Empirical probability, 0.0 before any outcome is recorded.
    pub fn probability(&self, outcome: u8) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.count(outcome) as f64 / self.total as f64
    }
}

/// Paired raw-vs-corrected counters for the mitigation pipeline. Because the
/// clean bit is known in simulation, error rates are measured directly rather
/// than inferred from the distribution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MitigationTally {
    pub raw: TossTally,
    pub corrected: TossTally,
    raw_errors: usize,
    corrected_errors: usize,
    trials: usize,
}

impl MitigationTally {
    pub fn new() -> Self {
        MitigationTally::default()
    }

    pub fn record(&mut self, clean: u8, raw: u8, corrected: u8) {
        self.raw.record(raw);
        self.corrected.record(corrected);
        if raw != clean {
            self.raw_errors += 1;
        }
        if corrected != clean {
            self.corrected_errors += 1;
        }
        self.trials += 1;
    }

    pub fn trials(&self) -> usize {
        self.trials
    }

    pub fn raw_error_rate(&self) -> f64 {
        if self.trials == 0 {
            return 0.0;
        }
        self.raw_errors as f64 / self.trials as f64
    }

    pub fn corrected_error_rate(&self) -> f64 {
        if self.trials == 0 {
            return 0.0;
        }
        self.corrected_errors as f64 / self.trials as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLengths {
    pub total_runs: usize,
    pub longest: usize,
    pub mean: f64,
}

/// Statistical summary of a binary outcome sequence: counts, bias, run
/// lengths, Shannon entropy, a chi-squared fairness check, and lag-1
/// autocorrelation as an independence indicator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceAnalysis {
    pub total: usize,
    pub zeros: usize,
    pub ones: usize,
    pub p_zero: f64,
    pub p_one: f64,
    /// Absolute deviation of p(1) from the fair 0.5.
    pub bias_from_fair: f64,
    pub runs: RunLengths,
    /// Shannon entropy in bits; 1.0 is the fair-coin maximum.
    pub entropy_bits: f64,
    pub chi_squared: f64,
    /// Whether the chi-squared statistic stays under the 5%-significance
    /// critical value for one degree of freedom.
    pub passes_fairness_check: bool,
    pub lag1_autocorrelation: f64,
}

impl SequenceAnalysis {
    pub fn from_bits(outcomes: &[u8]) -> Self {
        let total = outcomes.len();
        let ones = outcomes.iter().filter(|&&b| b == 1).count();
        let zeros = total - ones;
        let (p_zero, p_one) = if total == 0 {
            (0.0, 0.0)
        } else {
            (zeros as f64 / total as f64, ones as f64 / total as f64)
        };

        let mut entropy_bits = 0.0;
        for p in [p_zero, p_one] {
            if p > 0.0 {
                entropy_bits -= p * p.log2();
            }
        }

        let chi_squared = if total == 0 {
            0.0
        } else {
            let expected = total as f64 / 2.0;
            (zeros as f64 - expected).powi(2) / expected
                + (ones as f64 - expected).powi(2) / expected
        };

        SequenceAnalysis {
            total,
            zeros,
            ones,
            p_zero,
            p_one,
            bias_from_fair: (p_one - 0.5).abs(),
            runs: run_lengths(outcomes),
            entropy_bits,
            chi_squared,
            passes_fairness_check: chi_squared < CHI_SQUARED_CRITICAL_DF1,
            lag1_autocorrelation: lag1_autocorrelation(outcomes),
        }
    }
}

fn run_lengths(outcomes: &[u8]) -> RunLengths {
    if outcomes.is_empty() {
        return RunLengths {
            total_runs: 0,
            longest: 0,
            mean: 0.0,
        };
    }
    let mut total_runs = 1;
    let mut longest = 1;
    let mut current = 1;
    for window in outcomes.windows(2) {
        if window[0] == window[1] {
            current += 1;
            longest = longest.max(current);
        } else {
            total_runs += 1;
            current = 1;
        }
    }
    RunLengths {
        total_runs,
        longest,
        mean: outcomes.len() as f64 / total_runs as f64,
    }
}

/// Pearson correlation between the sequence and itself shifted by one.
/// Degenerate sequences (constant, or shorter than two) report 0.
fn lag1_autocorrelation(outcomes: &[u8]) -> f64 {
    if outcomes.len() < 2 {
        return 0.0;
    }
    let n = outcomes.len() - 1;
    let xs = &outcomes[..outcomes.len() - 1];
    let ys = &outcomes[1..];
    let mean_x = xs.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let mean_y = ys.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (&x, &y) in xs.iter().zip(ys.iter()) {
        let dx = x as f64 - mean_x;
        let dy = y as f64 - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return 0.0;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}
