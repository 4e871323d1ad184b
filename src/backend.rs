use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::QrngError;

/// Probability of a toss measuring 1. Stored as a plain probability but
/// constructible from the Ry-rotation angle convention, where a qubit prepared
/// with `Ry(theta)` measures 1 with probability `sin^2(theta / 2)`.
///
/// Serializes as a bare number; deserialization goes through
/// [`Bias::from_probability`] so an out-of-range value in a config file fails
/// up front instead of panicking inside the sampler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Bias {
    p_one: f64,
}

impl Bias {
    /// The fair coin, p(1) = 0.5.
    pub fn fair() -> Self {
        Bias { p_one: 0.5 }
    }

    pub fn from_probability(p_one: f64) -> Result<Self, QrngError> {
        crate::check_probability("bias", p_one)?;
        Ok(Bias { p_one })
    }

    /// Rotation-angle constructor. `theta = 0` always measures 0,
    /// `theta = pi` always measures 1, `theta = pi / 2` is fair.
    pub fn from_angle(theta: f64) -> Self {
        let s = (theta / 2.0).sin();
        Bias { p_one: s * s }
    }

    pub fn p_one(&self) -> f64 {
        self.p_one
    }

    pub fn p_zero(&self) -> f64 {
        1.0 - self.p_one
    }
}

impl Default for Bias {
    fn default() -> Self {
        Bias::fair()
    }
}

impl TryFrom<f64> for Bias {
    type Error = QrngError;

    fn try_from(p_one: f64) -> Result<Self, Self::Error> {
        Bias::from_probability(p_one)
    }
}

impl From<Bias> for f64 {
    fn from(bias: Bias) -> f64 {
        bias.p_one
    }
}

/// The narrow seam between the trial loops and whatever produces the random
/// outcomes. Production code uses [`SimulatedBackend`]; tests script exact
/// sequences with [`ScriptedSource`].
pub trait BitSource {
    /// Sample a single bit, 1 with the configured probability.
    fn sample_bit(&mut self, bias: Bias) -> Result<u8, QrngError>;

    /// Sample a single trit uniformly from {0, 1, 2}.
    fn sample_trit(&mut self) -> Result<u8, QrngError>;
}

/// PRNG-backed stand-in for a quantum backend. A real provider would run a
/// one-qubit circuit per sample; the measurement statistics are identical.
pub struct SimulatedBackend {
    rng: StdRng,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        SimulatedBackend {
            rng: StdRng::from_entropy(),
        }
    }

    /// Seeded construction for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        SimulatedBackend {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        SimulatedBackend::new()
    }
}

impl BitSource for SimulatedBackend {
    fn sample_bit(&mut self, bias: Bias) -> Result<u8, QrngError> {
        Ok(self.rng.gen_bool(bias.p_one()) as u8)
    }

    // Two fair bits emulate the 2-qubit qutrit circuit: 00 -> 0, 01 -> 1,
    // 10 -> 2. The 11 outcome is rejected and redrawn so the three values
    // stay uniform; expected cost is 4/3 draws per trit.
    fn sample_trit(&mut self) -> Result<u8, QrngError> {
        loop {
            let high = self.rng.gen_bool(0.5) as u8;
            let low = self.rng.gen_bool(0.5) as u8;
            match (high, low) {
                (0, 0) => return Ok(0),
                (0, 1) => return Ok(1),
                (1, 0) => return Ok(2),
                _ => continue,
            }
        }
    }
}

/// Deterministic source that replays a scripted outcome sequence, for testing
/// the decoder and trial loops without touching a PRNG. Ignores the bias.
pub struct ScriptedSource {
    bits: VecDeque<u8>,
    trits: VecDeque<u8>,
}

impl ScriptedSource {
    pub fn from_bits(bits: impl IntoIterator<Item = u8>) -> Self {
        ScriptedSource {
            bits: bits.into_iter().collect(),
            trits: VecDeque::new(),
        }
    }

    pub fn from_trits(trits: impl IntoIterator<Item = u8>) -> Self {
        ScriptedSource {
            bits: VecDeque::new(),
            trits: trits.into_iter().collect(),
        }
    }

    pub fn remaining_bits(&self) -> usize {
        self.bits.len()
    }
}

impl BitSource for ScriptedSource {
    fn sample_bit(&mut self, _bias: Bias) -> Result<u8, QrngError> {
        self.bits
            .pop_front()
            .ok_or_else(|| QrngError::Backend("scripted bit source exhausted".to_string()))
    }

    fn sample_trit(&mut self) -> Result<u8, QrngError> {
        self.trits
            .pop_front()
            .ok_or_else(|| QrngError::Backend("scripted trit source exhausted".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bias_validation() {
        assert!(Bias::from_probability(0.0).is_ok());
        assert!(Bias::from_probability(1.0).is_ok());
        assert!(Bias::from_probability(-0.1).is_err());
        assert!(Bias::from_probability(1.1).is_err());
    }

    #[test]
    fn bias_from_angle_matches_rotation_convention() {
        assert!(Bias::from_angle(0.0).p_one().abs() < 1e-12);
        assert!((Bias::from_angle(std::f64::consts::PI).p_one() - 1.0).abs() < 1e-12);
        assert!((Bias::from_angle(std::f64::consts::FRAC_PI_2).p_one() - 0.5).abs() < 1e-12);
        // P(1) = sin^2(theta / 2) at an arbitrary angle.
        let theta: f64 = 1.234;
        let expected = (theta / 2.0).sin().powi(2);
        assert!((Bias::from_angle(theta).p_one() - expected).abs() < 1e-12);
    }

    #[test]
    fn bias_deserialization_is_validated() {
        assert!(serde_json::from_str::<Bias>("1.5").is_err());
        assert!(serde_json::from_str::<Bias>("-0.1").is_err());
        let bias: Bias = serde_json::from_str("0.25").unwrap();
        assert!((bias.p_one() - 0.25).abs() < 1e-12);
        assert_eq!(serde_json::to_string(&Bias::fair()).unwrap(), "0.5");
    }

    #[test]
    fn fair_bits_converge_to_half() {
        let mut backend = SimulatedBackend::seeded(7);
        let trials = 10_000;
        let mut ones = 0;
        for _ in 0..trials {
            ones += backend.sample_bit(Bias::fair()).unwrap() as usize;
        }
        let p_one = ones as f64 / trials as f64;
        assert!(
            (p_one - 0.5).abs() < 0.02,
            "fair coin drifted: p(1) = {p_one}"
        );
    }

    #[test]
    fn biased_bits_converge_to_configured_probability() {
        let bias = Bias::from_probability(0.1).unwrap();
        let mut backend = SimulatedBackend::seeded(11);
        let trials = 20_000;
        let mut ones = 0;
        for _ in 0..trials {
            ones += backend.sample_bit(bias).unwrap() as usize;
        }
        let p_one = ones as f64 / trials as f64;
        assert!((p_one - 0.1).abs() < 0.02, "biased coin: p(1) = {p_one}");
    }

    #[test]
    fn trits_are_uniform() {
        let mut backend = SimulatedBackend::seeded(13);
        let trials = 30_000;
        let mut counts = [0usize; 3];
        for _ in 0..trials {
            counts[backend.sample_trit().unwrap() as usize] += 1;
        }
        for (value, count) in counts.iter().enumerate() {
            let p = *count as f64 / trials as f64;
            assert!(
                (p - 1.0 / 3.0).abs() < 0.02,
                "trit {value} off uniform: p = {p}"
            );
        }
    }

    #[test]
    fn scripted_source_replays_in_order_then_fails() {
        let mut source = ScriptedSource::from_bits([1, 0, 1]);
        assert_eq!(source.sample_bit(Bias::fair()).unwrap(), 1);
        assert_eq!(source.sample_bit(Bias::fair()).unwrap(), 0);
        assert_eq!(source.sample_bit(Bias::fair()).unwrap(), 1);
        assert!(source.sample_bit(Bias::fair()).is_err());
    }
}
