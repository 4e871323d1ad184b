use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::QrngError;

/// Bit-flip noise injector emulating measurement error on hardware. Owns its
/// own RNG so flip decisions stay independent of the trial source.
pub struct FlipChannel {
    error_rate: f64,
    rng: StdRng,
}

impl FlipChannel {
    /// Fails for error rates outside `[0, 1]` before any randomness is drawn.
    pub fn new(error_rate: f64) -> Result<Self, QrngError> {
        crate::check_probability("error rate", error_rate)?;
        Ok(FlipChannel {
            error_rate,
            rng: StdRng::from_entropy(),
        })
    }

    pub fn seeded(error_rate: f64, seed: u64) -> Result<Self, QrngError> {
        crate::check_probability("error rate", error_rate)?;
        Ok(FlipChannel {
            error_rate,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Channel that passes every bit through untouched.
    pub fn noiseless() -> Self {
        FlipChannel {
            error_rate: 0.0,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn error_rate(&self) -> f64 {
        self.error_rate
    }

    /// Transmit one bit, flipping it with the configured probability.
    pub fn transmit(&mut self, bit: u8) -> u8 {
        debug_assert!(bit <= 1, "FlipChannel carries bits, got {bit}");
        if self.rng.gen_bool(self.error_rate) {
            1 - bit
        } else {
            bit
        }
    }
}
