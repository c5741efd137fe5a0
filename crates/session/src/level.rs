//! Microphone level metering
//!
//! Samples the latest captured frame on a short interval, runs a
//! small FFT over it, and publishes the average spectrum magnitude
//! normalized into [0.0, 1.0]. Consumers subscribe through a watch
//! channel; a muted track captures silence, so the level decays to
//! zero without special casing.

use std::sync::Arc;

use parking_lot::Mutex;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::debug;

use voice_client_config::AudioConfig;
use voice_client_core::AudioInput;

/// Publishes a normalized input level while attached to an input.
pub struct AudioLevelMonitor {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    interval_ms: u64,
    level_tx: watch::Sender<f32>,
    level_rx: watch::Receiver<f32>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AudioLevelMonitor {
    pub fn new(audio: &AudioConfig) -> Self {
        let fft = FftPlanner::new().plan_fft_forward(audio.fft_size);
        let (level_tx, level_rx) = watch::channel(0.0);
        Self {
            fft,
            fft_size: audio.fft_size,
            interval_ms: audio.level_interval_ms,
            level_tx,
            level_rx,
            task: Mutex::new(None),
        }
    }

    /// Start metering the given input. Replaces any prior attachment.
    pub fn attach(&self, input: Arc<dyn AudioInput>) {
        self.detach();

        let fft = self.fft.clone();
        let fft_size = self.fft_size;
        let interval_ms = self.interval_ms;
        let level_tx = self.level_tx.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(interval_ms));
            loop {
                ticker.tick().await;
                if input.is_stopped() {
                    break;
                }
                let level = match input.latest_frame() {
                    Some(frame) => spectrum_level(&fft, fft_size, &frame.samples),
                    None => 0.0,
                };
                if level_tx.send(level).is_err() {
                    break;
                }
            }
        });

        *self.task.lock() = Some(handle);
        debug!(fft_size = self.fft_size, "level monitor attached");
    }

    /// Stop metering and reset the published level to zero.
    /// Idempotent.
    pub fn detach(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
            let _ = self.level_tx.send(0.0);
            debug!("level monitor detached");
        }
    }

    /// Current level in [0.0, 1.0].
    pub fn level(&self) -> f32 {
        *self.level_rx.borrow()
    }

    /// Watch the published level.
    pub fn subscribe(&self) -> watch::Receiver<f32> {
        self.level_rx.clone()
    }
}

impl Drop for AudioLevelMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

/// Average spectrum magnitude of one frame, normalized to [0.0, 1.0].
fn spectrum_level(fft: &Arc<dyn Fft<f32>>, fft_size: usize, samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let mut buffer: Vec<Complex<f32>> = samples
        .iter()
        .copied()
        .chain(std::iter::repeat(0.0))
        .take(fft_size)
        .map(|s| Complex::new(s, 0.0))
        .collect();

    fft.process(&mut buffer);

    // Positive-frequency bins only; bin magnitude scales with N/2 at
    // full amplitude, so that is the normalization factor.
    let bins = fft_size / 2;
    let sum: f32 = buffer[..bins].iter().map(|c| c.norm()).sum();
    let avg = sum / bins as f32;
    (avg / (fft_size as f32 / 2.0)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::f32::consts::PI;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use voice_client_core::AudioFrame;

    fn plan(fft_size: usize) -> Arc<dyn Fft<f32>> {
        FftPlanner::new().plan_fft_forward(fft_size)
    }

    #[test]
    fn test_silence_levels_at_zero() {
        let fft = plan(256);
        let level = spectrum_level(&fft, 256, &vec![0.0; 256]);
        assert!(level < 1e-6);
    }

    #[test]
    fn test_tone_levels_above_zero_within_bounds() {
        let fft = plan(256);
        let tone: Vec<f32> = (0..256)
            .map(|i| (2.0 * PI * 8.0 * i as f32 / 256.0).sin() * 0.8)
            .collect();
        let level = spectrum_level(&fft, 256, &tone);
        assert!(level > 0.0);
        assert!(level <= 1.0);
    }

    #[test]
    fn test_clipped_signal_stays_clamped() {
        let fft = plan(256);
        let loud = vec![4.0; 256];
        let level = spectrum_level(&fft, 256, &loud);
        assert!(level <= 1.0);
    }

    #[test]
    fn test_short_frame_is_zero_padded() {
        let fft = plan(256);
        let level = spectrum_level(&fft, 256, &[0.5; 64]);
        assert!(level > 0.0);
        assert!(level <= 1.0);
    }

    struct ToneInput {
        stopped: AtomicBool,
        frame: AudioFrame,
    }

    #[async_trait]
    impl AudioInput for ToneInput {
        fn track_count(&self) -> usize {
            1
        }

        fn sample_rate(&self) -> u32 {
            48_000
        }

        fn set_enabled(&self, _enabled: bool) {}

        fn is_enabled(&self) -> bool {
            true
        }

        async fn next_frame(&self) -> Option<AudioFrame> {
            None
        }

        fn latest_frame(&self) -> Option<AudioFrame> {
            Some(self.frame.clone())
        }

        fn watch_ended(&self) -> watch::Receiver<bool> {
            watch::channel(false).1
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }

        fn is_stopped(&self) -> bool {
            self.stopped.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_attach_publishes_level_and_detach_resets() {
        let config = AudioConfig {
            level_interval_ms: 1,
            ..AudioConfig::default()
        };
        let monitor = AudioLevelMonitor::new(&config);

        let tone: Vec<f32> = (0..960)
            .map(|i| (2.0 * PI * 8.0 * i as f32 / 256.0).sin() * 0.8)
            .collect();
        let input = Arc::new(ToneInput {
            stopped: AtomicBool::new(false),
            frame: AudioFrame::new(tone, 48_000, 0),
        });

        monitor.attach(input);

        let mut rx = monitor.subscribe();
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                rx.changed().await.unwrap();
                if *rx.borrow() > 0.0 {
                    break;
                }
            }
        })
        .await
        .unwrap();
        assert!(monitor.level() > 0.0);

        monitor.detach();
        assert_eq!(monitor.level(), 0.0);
    }

    #[tokio::test]
    async fn test_detach_without_attach_is_noop() {
        let monitor = AudioLevelMonitor::new(&AudioConfig::default());
        monitor.detach();
        assert_eq!(monitor.level(), 0.0);
    }
}
