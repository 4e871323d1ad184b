//! Repetition code over the bit-flip channel, decoded by majority vote.
//!
//! Each logical trial is transmitted `R` times and the received samples are
//! resolved to the value seen in more than half of them. With flip
//! probability `p < 0.5` this drives the effective error rate down to the
//! binomial tail `sum_{k > R/2} C(R, k) p^k (1 - p)^(R - k)`, which is the
//! whole point of running an odd number of repetitions.

use crate::channel::FlipChannel;
use crate::QrngError;

/// Repetition-code parameters. `repetitions` of 1 makes the code a no-op;
/// odd counts are the expected operating mode since they cannot tie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepetitionCode {
    repetitions: usize,
}

impl RepetitionCode {
    pub fn new(repetitions: usize) -> Result<Self, QrngError> {
        if repetitions == 0 {
            return Err(QrngError::InvalidRepetitions(repetitions));
        }
        Ok(RepetitionCode { repetitions })
    }

    pub fn repetitions(&self) -> usize {
        self.repetitions
    }

    /// Majority vote. Returns 1 iff strictly more than half the samples are 1,
    /// so an exact tie (possible only for even counts) decodes to 0. The tie
    /// policy is deterministic and consumes no extra randomness.
    pub fn decode(&self, samples: &[u8]) -> u8 {
        debug_assert_eq!(samples.len(), self.repetitions);
        let ones = samples.iter().filter(|&&s| s == 1).count();
        (2 * ones > samples.len()) as u8
    }

    /// Push one clean bit through the channel `repetitions` times and decode.
    pub fn transmit(&self, clean: u8, channel: &mut FlipChannel) -> RepetitionBatch {
        let samples: Vec<u8> = (0..self.repetitions).map(|_| channel.transmit(clean)).collect();
        let decoded = self.decode(&samples);
        RepetitionBatch { samples, decoded }
    }
}

/// The ordered noisy samples of one logical trial plus their decoded value.
#[derive(Debug, Clone)]
pub struct RepetitionBatch {
    samples: Vec<u8>,
    decoded: u8,
}

impl RepetitionBatch {
    /// What a single unmitigated measurement would have returned.
    pub fn raw(&self) -> u8 {
        self.samples[0]
    }

    pub fn decoded(&self) -> u8 {
        self.decoded
    }

    pub fn samples(&self) -> &[u8] {
        &self.samples
    }
}
