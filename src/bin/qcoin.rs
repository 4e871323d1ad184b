use clap::Parser;
use simple_logger::SimpleLogger;

use qcoin::backend::{Bias, SimulatedBackend};
use qcoin::experiment::{
    run_mitigated, run_qutrit, run_rng, run_tosses, sweep_error_rates, MitigationConfig,
    MitigationReport, TossConfig,
};
use qcoin::QrngError;

#[derive(Parser)]
#[command(version, about = "Quantum coin toss experiments with error mitigation", long_about = None)]
enum Cli {
    /// Fair or biased coin tosses, no noise.
    Toss {
        #[arg(long, default_value_t = 100)]
        trials: usize,
        /// Probability of measuring 1.
        #[arg(long, conflicts_with = "angle")]
        p_one: Option<f64>,
        /// Ry rotation angle in radians; p(1) = sin^2(angle / 2).
        #[arg(long)]
        angle: Option<f64>,
        #[arg(long)]
        seed: Option<u64>,
        /// Pause between tosses, milliseconds.
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
        /// Emit the full report as JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },
    /// Noisy tosses with repetition-code mitigation, raw vs corrected.
    Mitigated {
        #[arg(long, default_value_t = 100)]
        trials: usize,
        #[arg(long, conflicts_with = "angle")]
        p_one: Option<f64>,
        #[arg(long)]
        angle: Option<f64>,
        /// Bit-flip probability per transmission.
        #[arg(long, default_value_t = 0.05)]
        error_rate: f64,
        /// Transmissions per logical toss; odd counts avoid ties.
        #[arg(long, default_value_t = 5)]
        repetitions: usize,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
        #[arg(long)]
        json: bool,
    },
    /// Three-level qutrit sampling, uniform over {0, 1, 2}.
    Qutrit {
        #[arg(long, default_value_t = 100)]
        trials: usize,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
        #[arg(long)]
        json: bool,
    },
    /// Multi-bit random numbers assembled from fair bit samples.
    Rng {
        /// Bits per number, 1 through 64.
        #[arg(long, default_value_t = 8)]
        bits: usize,
        /// How many numbers to draw.
        #[arg(long, default_value_t = 10)]
        count: usize,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Mitigation experiment across a list of error rates, run in parallel.
    Sweep {
        #[arg(long, default_value_t = 10_000)]
        trials: usize,
        /// Error rates to sweep.
        #[arg(long, num_args = 1.., default_values_t = [0.01, 0.05, 0.1, 0.2])]
        error_rates: Vec<f64>,
        #[arg(long, default_value_t = 5)]
        repetitions: usize,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        json: bool,
    },
}

fn bias_from(p_one: Option<f64>, angle: Option<f64>) -> Result<Bias, QrngError> {
    match (p_one, angle) {
        (Some(p), _) => Bias::from_probability(p),
        (None, Some(theta)) => Ok(Bias::from_angle(theta)),
        (None, None) => Ok(Bias::fair()),
    }
}

fn backend_from(seed: Option<u64>) -> SimulatedBackend {
    match seed {
        Some(s) => SimulatedBackend::seeded(s),
        None => SimulatedBackend::new(),
    }
}

fn print_json<T: serde::Serialize>(report: &T) {
    println!(
        "{}",
        serde_json::to_string_pretty(report).expect("report serialization cannot fail")
    );
}

fn print_mitigation_summary(report: &MitigationReport) {
    println!("==== Mitigation Results ====");
    println!(
        "trials: {}, repetitions: {}, error rate: {:.4}",
        report.trials, report.repetitions, report.error_rate
    );
    println!(
        "raw:       p(1) = {:.4} ({} ones / {} zeros), error rate {:.4}",
        report.raw_p_one, report.raw_ones, report.raw_zeros, report.raw_error_rate
    );
    println!(
        "corrected: p(1) = {:.4} ({} ones / {} zeros), error rate {:.4}",
        report.corrected_p_one,
        report.corrected_ones,
        report.corrected_zeros,
        report.corrected_error_rate
    );
    println!(
        "theory: raw {:.4}, corrected {:.4}",
        report.theoretical_raw_error_rate, report.theoretical_corrected_error_rate
    );
    match report.improvement_factor {
        Some(factor) => println!("improvement factor: {factor:.2}x"),
        None => println!("improvement factor: no corrected errors observed"),
    }
}

fn main() -> Result<(), QrngError> {
    SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap();
    match Cli::parse() {
        Cli::Toss {
            trials,
            p_one,
            angle,
            seed,
            delay_ms,
            json,
        } => {
            let mut config = TossConfig::new(trials, bias_from(p_one, angle)?)?;
            config.delay_ms = delay_ms;
            let mut source = backend_from(seed);
            let report = run_tosses(&mut source, &config)?;
            if json {
                print_json(&report);
            } else {
                println!("==== Coin Toss Results ====");
                println!(
                    "trials: {}, p(1) = {:.4} (theory {:.4}), p(0) = {:.4}",
                    report.trials, report.p_one, report.theoretical_p_one, report.p_zero
                );
                println!(
                    "entropy: {:.4} bits, longest run: {}, chi-squared: {:.4} ({})",
                    report.analysis.entropy_bits,
                    report.analysis.runs.longest,
                    report.analysis.chi_squared,
                    if report.analysis.passes_fairness_check {
                        "fair"
                    } else {
                        "biased"
                    }
                );
            }
        }
        Cli::Mitigated {
            trials,
            p_one,
            angle,
            error_rate,
            repetitions,
            seed,
            delay_ms,
            json,
        } => {
            let mut config =
                MitigationConfig::new(trials, bias_from(p_one, angle)?, error_rate, repetitions)?;
            config.delay_ms = delay_ms;
            let mut source = backend_from(seed);
            let report = run_mitigated(&mut source, &config)?;
            if json {
                print_json(&report);
            } else {
                print_mitigation_summary(&report);
            }
        }
        Cli::Qutrit {
            trials,
            seed,
            delay_ms,
            json,
        } => {
            let mut source = backend_from(seed);
            let report = run_qutrit(&mut source, trials, delay_ms)?;
            if json {
                print_json(&report);
            } else {
                println!("==== Qutrit Results ====");
                for value in 0..3 {
                    println!(
                        "outcome {value}: {} ({:.4}, ideal {:.4})",
                        report.counts[value], report.probabilities[value], report.ideal_probability
                    );
                }
            }
        }
        Cli::Rng {
            bits,
            count,
            seed,
            json,
        } => {
            let mut source = backend_from(seed);
            let report = run_rng(&mut source, bits, count)?;
            if json {
                print_json(&report);
            } else {
                println!(
                    "==== Random Numbers ({} x {}-bit, 0..={}) ====",
                    report.draws, report.bits, report.max_value
                );
                for value in &report.values {
                    print!("{value} ");
                }
                println!();
            }
        }
        Cli::Sweep {
            trials,
            error_rates,
            repetitions,
            seed,
            json,
        } => {
            let base = MitigationConfig::new(
                trials,
                Bias::fair(),
                *error_rates.first().unwrap_or(&0.0),
                repetitions,
            )?;
            let reports = sweep_error_rates(&base, &error_rates, seed)?;
            if json {
                print_json(&reports);
            } else {
                for report in &reports {
                    print_mitigation_summary(report);
                    println!();
                }
            }
        }
    }
    Ok(())
}
