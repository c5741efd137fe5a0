//! Audio frame types and capture constraints

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Processing hints applied when acquiring the microphone.
///
/// All three default on; the session always requests them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// A chunk of captured microphone audio.
///
/// Samples are f32 normalized to [-1.0, 1.0], mono.
#[derive(Clone)]
pub struct AudioFrame {
    /// Raw samples.
    pub samples: Arc<[f32]>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Capture time, epoch milliseconds.
    pub timestamp_ms: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, timestamp_ms: u64) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            timestamp_ms,
        }
    }

    /// An all-zero frame of the given length. Emitted in place of
    /// captured audio while the track is disabled (muted).
    pub fn silence(len: usize, sample_rate: u32, timestamp_ms: u64) -> Self {
        Self::new(vec![0.0; len], sample_rate, timestamp_ms)
    }

    /// RMS energy of the frame.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_squares: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum_squares / self.samples.len() as f32).sqrt()
    }
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("samples_len", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .field("timestamp_ms", &self.timestamp_ms)
            .finish()
    }
}
