//! Trial-loop orchestration: the functions the CLI calls to run N tosses at a
//! given bias / error rate / repetition count and get aggregated statistics
//! back. Every config validates before the first sample is drawn; a backend
//! failure mid-run aborts the whole run.

use std::time::Duration;

use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::backend::{Bias, BitSource, SimulatedBackend};
use crate::channel::FlipChannel;
use crate::mitigation::RepetitionCode;
use crate::stats::{MitigationTally, SequenceAnalysis, TossTally};
use crate::QrngError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TossConfig {
    pub trials: usize,
    pub bias: Bias,
    /// Demo pacing between trials, milliseconds. Zero for full speed.
    #[serde(default)]
    pub delay_ms: u64,
}

impl TossConfig {
    pub fn new(trials: usize, bias: Bias) -> Result<Self, QrngError> {
        if trials == 0 {
            return Err(QrngError::InvalidTrials(trials));
        }
        Ok(TossConfig {
            trials,
            bias,
            delay_ms: 0,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TossReport {
    pub trials: usize,
    pub zeros: usize,
    pub ones: usize,
    pub p_zero: f64,
    pub p_one: f64,
    pub theoretical_p_one: f64,
    pub analysis: SequenceAnalysis,
}

/// Run `trials` tosses with no noise and no mitigation.
pub fn run_tosses<S: BitSource>(
    source: &mut S,
    config: &TossConfig,
) -> Result<TossReport, QrngError> {
    if config.trials == 0 {
        return Err(QrngError::InvalidTrials(config.trials));
    }
    // Catches biases that dodged the validated constructors, e.g. a NaN angle.
    crate::check_probability("bias", config.bias.p_one())?;
    let mut outcomes = Vec::with_capacity(config.trials);
    let mut tally = TossTally::new();
    let interval = progress_interval(config.trials);
    for trial in 1..=config.trials {
        let bit = source.sample_bit(config.bias)?;
        tally.record(bit);
        outcomes.push(bit);
        if trial % interval == 0 {
            log::info!("completed {trial}/{} tosses", config.trials);
        }
        pace(config.delay_ms);
    }
    Ok(TossReport {
        trials: config.trials,
        zeros: tally.count(0),
        ones: tally.count(1),
        p_zero: tally.probability(0),
        p_one: tally.probability(1),
        theoretical_p_one: config.bias.p_one(),
        analysis: SequenceAnalysis::from_bits(&outcomes),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MitigationConfig {
    pub trials: usize,
    pub bias: Bias,
    pub error_rate: f64,
    pub repetitions: usize,
    /// Seed for the noise channel; `None` seeds from entropy.
    #[serde(default)]
    pub channel_seed: Option<u64>,
    #[serde(default)]
    pub delay_ms: u64,
}

impl MitigationConfig {
    pub fn new(
        trials: usize,
        bias: Bias,
        error_rate: f64,
        repetitions: usize,
    ) -> Result<Self, QrngError> {
        let config = MitigationConfig {
            trials,
            bias,
            error_rate,
            repetitions,
            channel_seed: None,
            delay_ms: 0,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), QrngError> {
        if self.trials == 0 {
            return Err(QrngError::InvalidTrials(self.trials));
        }
        crate::check_probability("bias", self.bias.p_one())?;
        crate::check_probability("error rate", self.error_rate)?;
        if self.repetitions == 0 {
            return Err(QrngError::InvalidRepetitions(self.repetitions));
        }
        Ok(())
    }

    fn channel(&self) -> Result<FlipChannel, QrngError> {
        match self.channel_seed {
            Some(seed) => FlipChannel::seeded(self.error_rate, seed),
            None => FlipChannel::new(self.error_rate),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MitigationReport {
    pub trials: usize,
    pub repetitions: usize,
    pub error_rate: f64,
    pub theoretical_p_one: f64,
    pub raw_zeros: usize,
    pub raw_ones: usize,
    pub raw_p_one: f64,
    pub corrected_zeros: usize,
    pub corrected_ones: usize,
    pub corrected_p_one: f64,
    pub raw_error_rate: f64,
    pub corrected_error_rate: f64,
    pub theoretical_raw_error_rate: f64,
    /// Binomial tail `sum_{k > R/2} C(R, k) p^k (1 - p)^(R - k)`. Exact for
    /// odd repetition counts; for even counts the tie-to-zero policy makes
    /// the true rate depend on the clean bit.
    pub theoretical_corrected_error_rate: f64,
    /// Raw over corrected error rate; `None` when no corrected errors landed.
    pub improvement_factor: Option<f64>,
}

/// Run the full mitigation pipeline: per trial, draw one clean bit from the
/// source and push it through the noisy channel `repetitions` times; the first
/// transmission is the raw stream, the majority vote the corrected one.
pub fn run_mitigated<S: BitSource>(
    source: &mut S,
    config: &MitigationConfig,
) -> Result<MitigationReport, QrngError> {
    config.validate()?;
    let code = RepetitionCode::new(config.repetitions)?;
    let mut channel = config.channel()?;
    let mut tally = MitigationTally::new();
    let interval = progress_interval(config.trials);
    for trial in 1..=config.trials {
        let clean = source.sample_bit(config.bias)?;
        let batch = code.transmit(clean, &mut channel);
        tally.record(clean, batch.raw(), batch.decoded());
        if trial % interval == 0 {
            log::info!("completed {trial}/{} mitigated tosses", config.trials);
        }
        pace(config.delay_ms);
    }
    let corrected_error_rate = tally.corrected_error_rate();
    Ok(MitigationReport {
        trials: config.trials,
        repetitions: config.repetitions,
        error_rate: config.error_rate,
        theoretical_p_one: config.bias.p_one(),
        raw_zeros: tally.raw.count(0),
        raw_ones: tally.raw.count(1),
        raw_p_one: tally.raw.probability(1),
        corrected_zeros: tally.corrected.count(0),
        corrected_ones: tally.corrected.count(1),
        corrected_p_one: tally.corrected.probability(1),
        raw_error_rate: tally.raw_error_rate(),
        corrected_error_rate,
        theoretical_raw_error_rate: config.error_rate,
        theoretical_corrected_error_rate: binomial_tail(config.error_rate, config.repetitions),
        improvement_factor: if corrected_error_rate > 0.0 {
            Some(tally.raw_error_rate() / corrected_error_rate)
        } else {
            None
        },
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct QutritReport {
    pub trials: usize,
    pub counts: [usize; 3],
    pub probabilities: [f64; 3],
    pub ideal_probability: f64,
}

/// Sample `trials` qutrit values and tally them against the uniform ideal.
pub fn run_qutrit<S: BitSource>(
    source: &mut S,
    trials: usize,
    delay_ms: u64,
) -> Result<QutritReport, QrngError> {
    if trials == 0 {
        return Err(QrngError::InvalidTrials(trials));
    }
    let mut tally = TossTally::new();
    let interval = progress_interval(trials);
    for trial in 1..=trials {
        tally.record(source.sample_trit()?);
        if trial % interval == 0 {
            log::info!("completed {trial}/{trials} qutrit measurements");
        }
        pace(delay_ms);
    }
    Ok(QutritReport {
        trials,
        counts: [tally.count(0), tally.count(1), tally.count(2)],
        probabilities: [
            tally.probability(0),
            tally.probability(1),
            tally.probability(2),
        ],
        ideal_probability: 1.0 / 3.0,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RngReport {
    pub bits: usize,
    pub draws: usize,
    pub max_value: u64,
    pub values: Vec<u64>,
}

/// Assemble one `bits`-wide random integer from fair bit samples, first bit
/// most significant (the measured-bitstring order). Widths of 1 through 64
/// are supported.
pub fn random_number<S: BitSource>(source: &mut S, bits: usize) -> Result<u64, QrngError> {
    if bits == 0 || bits > 64 {
        return Err(QrngError::InvalidBitWidth(bits));
    }
    let mut value = 0u64;
    for _ in 0..bits {
        value = (value << 1) | source.sample_bit(Bias::fair())? as u64;
    }
    Ok(value)
}

/// Draw `draws` random numbers of `bits` bits each.
pub fn run_rng<S: BitSource>(
    source: &mut S,
    bits: usize,
    draws: usize,
) -> Result<RngReport, QrngError> {
    if bits == 0 || bits > 64 {
        return Err(QrngError::InvalidBitWidth(bits));
    }
    if draws == 0 {
        return Err(QrngError::InvalidTrials(draws));
    }
    let mut values = Vec::with_capacity(draws);
    for _ in 0..draws {
        values.push(random_number(source, bits)?);
    }
    Ok(RngReport {
        bits,
        draws,
        max_value: if bits == 64 {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        },
        values,
    })
}

/// Run the mitigation experiment once per error rate, in parallel. Each rate
/// gets its own backend and channel; with `seed` set the per-rate seeds are
/// derived deterministically so the sweep is reproducible.
pub fn sweep_error_rates(
    base: &MitigationConfig,
    error_rates: &[f64],
    seed: Option<u64>,
) -> Result<Vec<MitigationReport>, QrngError> {
    base.validate()?;
    for &rate in error_rates {
        crate::check_probability("error rate", rate)?;
    }
    error_rates
        .par_iter()
        .enumerate()
        .map(|(ix, &rate)| {
            let mut config = base.clone();
            config.error_rate = rate;
            config.delay_ms = 0;
            let mut source = match seed {
                Some(s) => {
                    config.channel_seed = Some(s.wrapping_add(2 * ix as u64 + 1));
                    SimulatedBackend::seeded(s.wrapping_add(2 * ix as u64))
                }
                None => SimulatedBackend::new(),
            };
            run_mitigated(&mut source, &config)
        })
        .collect()
}

/// Tail of Binomial(r, p): probability that more than half of r transmissions
/// flip, i.e. that majority vote decodes the wrong value.
///
/// Terms are accumulated in log space; `C(r, k)` overflows f64 near r = 1030
/// if built directly.
pub fn binomial_tail(p: f64, r: usize) -> f64 {
    if p == 0.0 {
        return 0.0;
    }
    if p == 1.0 {
        return 1.0;
    }
    let ln_p = p.ln();
    let ln_q = (1.0 - p).ln();
    let mut ln_binom = 0.0; // ln C(r, 0)
    let mut tail = 0.0;
    for k in 0..=r {
        if 2 * k > r {
            tail += (ln_binom + k as f64 * ln_p + (r - k) as f64 * ln_q).exp();
        }
        ln_binom += ((r - k) as f64 / (k + 1) as f64).ln();
    }
    tail.min(1.0)
}

fn progress_interval(trials: usize) -> usize {
    (trials / 10).max(1)
}

fn pace(delay_ms: u64) {
    if delay_ms > 0 {
        std::thread::sleep(Duration::from_millis(delay_ms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ScriptedSource;

    #[test]
    fn binomial_tail_known_values() {
        // p = 0.5 leaves a symmetric distribution: odd r tails sum to 0.5.
        assert!((binomial_tail(0.5, 3) - 0.5).abs() < 1e-12);
        // r = 1: tail is just p.
        assert!((binomial_tail(0.3, 1) - 0.3).abs() < 1e-12);
        // r = 3, p = 0.1: 3 * 0.01 * 0.9 + 0.001 = 0.028.
        assert!((binomial_tail(0.1, 3) - 0.028).abs() < 1e-12);
        // r = 5, p = 0.2: 0.05792.
        assert!((binomial_tail(0.2, 5) - 0.05792).abs() < 1e-9);
        assert_eq!(binomial_tail(0.0, 5), 0.0);
        assert_eq!(binomial_tail(1.0, 5), 1.0);
    }

    #[test]
    fn binomial_tail_survives_large_repetition_counts() {
        // Direct C(r, k) accumulation overflows f64 past r ~ 1030.
        let tail = binomial_tail(0.5, 1001);
        assert!((tail - 0.5).abs() < 1e-9, "p = 0.5 tail {tail}");
        let small = binomial_tail(0.3, 2001);
        assert!(small.is_finite());
        assert!((0.0..=1.0).contains(&small));
        let large = binomial_tail(0.7, 2001);
        assert!(large.is_finite());
        assert!(large > 0.999, "p = 0.7, r = 2001 tail {large}");
    }

    #[test]
    fn invalid_configs_fail_before_sampling() {
        assert!(matches!(
            TossConfig::new(0, Bias::fair()),
            Err(QrngError::InvalidTrials(0))
        ));
        assert!(matches!(
            MitigationConfig::new(100, Bias::fair(), -0.1, 5),
            Err(QrngError::InvalidProbability { .. })
        ));
        assert!(matches!(
            MitigationConfig::new(100, Bias::fair(), 0.1, 0),
            Err(QrngError::InvalidRepetitions(0))
        ));

        // A bad config handed straight to the run function must not draw
        // from the source at all.
        let mut source = ScriptedSource::from_bits([1, 0, 1]);
        let config = MitigationConfig {
            trials: 3,
            bias: Bias::fair(),
            error_rate: 2.0,
            repetitions: 3,
            channel_seed: None,
            delay_ms: 0,
        };
        assert!(run_mitigated(&mut source, &config).is_err());
        assert_eq!(source.remaining_bits(), 3);
    }

    #[test]
    fn out_of_range_bias_fails_fast_instead_of_panicking() {
        // A config file can no longer smuggle in an invalid bias.
        let json = r#"{"trials": 10, "bias": 1.5, "error_rate": 0.1, "repetitions": 3}"#;
        assert!(serde_json::from_str::<MitigationConfig>(json).is_err());
        let valid = r#"{"trials": 10, "bias": 0.5, "error_rate": 0.1, "repetitions": 3}"#;
        assert!(serde_json::from_str::<MitigationConfig>(valid).is_ok());

        // A NaN angle slips past the constructors; the run functions must
        // reject it before sampling rather than panic inside the RNG.
        let mut source = ScriptedSource::from_bits([1, 0, 1]);
        let config = MitigationConfig {
            trials: 3,
            bias: Bias::from_angle(f64::NAN),
            error_rate: 0.1,
            repetitions: 3,
            channel_seed: None,
            delay_ms: 0,
        };
        assert!(matches!(
            run_mitigated(&mut source, &config),
            Err(QrngError::InvalidProbability { .. })
        ));
        assert_eq!(source.remaining_bits(), 3);

        let toss = TossConfig {
            trials: 3,
            bias: Bias::from_angle(f64::NAN),
            delay_ms: 0,
        };
        assert!(matches!(
            run_tosses(&mut source, &toss),
            Err(QrngError::InvalidProbability { .. })
        ));
        assert_eq!(source.remaining_bits(), 3);
    }

    #[test]
    fn random_number_assembles_bits_most_significant_first() {
        let mut source = ScriptedSource::from_bits([1, 0, 1, 0, 1, 1, 1, 1, 1, 1, 1]);
        assert_eq!(random_number(&mut source, 3).unwrap(), 0b101);
        assert_eq!(random_number(&mut source, 8).unwrap(), 127);
    }

    #[test]
    fn random_number_width_is_validated_before_sampling() {
        let mut source = ScriptedSource::from_bits([1, 1, 1]);
        assert!(matches!(
            random_number(&mut source, 0),
            Err(QrngError::InvalidBitWidth(0))
        ));
        assert!(matches!(
            random_number(&mut source, 65),
            Err(QrngError::InvalidBitWidth(65))
        ));
        assert!(matches!(
            run_rng(&mut source, 8, 0),
            Err(QrngError::InvalidTrials(0))
        ));
        assert_eq!(source.remaining_bits(), 3);
    }

    #[test]
    fn rng_draws_stay_in_range() {
        let mut source = SimulatedBackend::seeded(53);
        let report = run_rng(&mut source, 8, 200).unwrap();
        assert_eq!(report.values.len(), 200);
        assert_eq!(report.max_value, 255);
        assert!(report.values.iter().all(|&v| v <= 255));
        // A fair 8-bit source does not repeat one value 200 times.
        assert!(report.values.iter().any(|&v| v != report.values[0]));
        // Full-width draws must not overflow the max-value computation.
        let wide = run_rng(&mut source, 64, 2).unwrap();
        assert_eq!(wide.max_value, u64::MAX);
    }

    #[test]
    fn backend_failure_aborts_the_run() {
        let mut source = ScriptedSource::from_bits([1, 0]);
        let config = TossConfig::new(5, Bias::fair()).unwrap();
        assert!(matches!(
            run_tosses(&mut source, &config),
            Err(QrngError::Backend(_))
        ));
    }

    #[test]
    fn fair_tosses_converge() {
        let mut source = SimulatedBackend::seeded(23);
        let config = TossConfig::new(10_000, Bias::fair()).unwrap();
        let report = run_tosses(&mut source, &config).unwrap();
        assert_eq!(report.zeros + report.ones, 10_000);
        assert!((report.p_one - 0.5).abs() < 0.02, "p(1) = {}", report.p_one);
        assert!(report.analysis.passes_fairness_check);
    }

    #[test]
    fn noiseless_single_repetition_is_transparent() {
        let mut source = SimulatedBackend::seeded(29);
        let config = MitigationConfig::new(5_000, Bias::fair(), 0.0, 1).unwrap();
        let report = run_mitigated(&mut source, &config).unwrap();
        assert_eq!(report.raw_error_rate, 0.0);
        assert_eq!(report.corrected_error_rate, 0.0);
        assert_eq!(report.raw_ones, report.corrected_ones);
        assert_eq!(report.raw_zeros, report.corrected_zeros);
    }

    #[test]
    fn mitigation_improves_on_raw_stream() {
        let mut source = SimulatedBackend::seeded(31);
        let mut config = MitigationConfig::new(20_000, Bias::fair(), 0.2, 5).unwrap();
        config.channel_seed = Some(37);
        let report = run_mitigated(&mut source, &config).unwrap();
        assert!((report.raw_error_rate - 0.2).abs() < 0.02);
        assert!(
            (report.corrected_error_rate - report.theoretical_corrected_error_rate).abs() < 0.01
        );
        assert!(report.corrected_error_rate < report.raw_error_rate);
        assert!(report.improvement_factor.unwrap() > 1.0);
    }

    #[test]
    fn qutrit_outcomes_converge_to_thirds() {
        let mut source = SimulatedBackend::seeded(41);
        let report = run_qutrit(&mut source, 30_000, 0).unwrap();
        assert_eq!(report.counts.iter().sum::<usize>(), 30_000);
        for p in report.probabilities {
            assert!((p - 1.0 / 3.0).abs() < 0.02, "qutrit p = {p}");
        }
    }

    #[test]
    fn sweep_covers_every_rate_and_stays_validated() {
        let base = MitigationConfig::new(4_000, Bias::fair(), 0.1, 3).unwrap();
        let rates = [0.0, 0.05, 0.1, 0.2];
        let reports = sweep_error_rates(&base, &rates, Some(43)).unwrap();
        assert_eq!(reports.len(), rates.len());
        for (report, &rate) in reports.iter().zip(rates.iter()) {
            assert_eq!(report.error_rate, rate);
            assert_eq!(report.trials, 4_000);
        }
        // Zero noise sweep entry sees no errors at all.
        assert_eq!(reports[0].raw_error_rate, 0.0);

        assert!(sweep_error_rates(&base, &[0.1, 1.5], Some(1)).is_err());
    }

    #[test]
    fn sweep_is_reproducible_under_a_seed() {
        let base = MitigationConfig::new(2_000, Bias::fair(), 0.1, 3).unwrap();
        let rates = [0.05, 0.15];
        let first = sweep_error_rates(&base, &rates, Some(47)).unwrap();
        let second = sweep_error_rates(&base, &rates, Some(47)).unwrap();
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.raw_ones, b.raw_ones);
            assert_eq!(a.corrected_ones, b.corrected_ones);
        }
    }
}
