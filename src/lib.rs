//! Coin-toss style random-bit generation against a simulated quantum backend,
//! with bit-flip noise injection, repetition-code error mitigation, and
//! statistics comparing the raw and corrected outcome streams.

pub mod backend;
pub mod channel;
pub mod experiment;
pub mod mitigation;
pub mod stats;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QrngError {
    #[error("{name} must lie in [0, 1], got {value}")]
    InvalidProbability { name: &'static str, value: f64 },

    #[error("repetition count must be at least 1, got {0}")]
    InvalidRepetitions(usize),

    #[error("trial count must be at least 1, got {0}")]
    InvalidTrials(usize),

    #[error("bit width must lie in [1, 64], got {0}")]
    InvalidBitWidth(usize),

    #[error("backend failure: {0}")]
    Backend(String),
}

/// Shared fail-fast check for probability-valued parameters.
pub(crate) fn check_probability(name: &'static str, value: f64) -> Result<(), QrngError> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        return Err(QrngError::InvalidProbability { name, value });
    }
    Ok(())
}
