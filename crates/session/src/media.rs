//! Media acquisition and release
//!
//! Thin lifecycle wrapper over the [`MediaSource`] seam: builds the
//! capture constraints from config, validates what the source hands
//! back, and releases the device exactly once per acquisition.

use std::sync::Arc;

use tracing::{debug, info, warn};

use voice_client_config::AudioConfig;
use voice_client_core::{AudioConstraints, AudioInput, MediaSource, SessionError};

/// Acquires and releases the microphone for a session.
pub struct MediaAcquirer {
    source: Arc<dyn MediaSource>,
    constraints: AudioConstraints,
}

impl MediaAcquirer {
    pub fn new(source: Arc<dyn MediaSource>, audio: &AudioConfig) -> Self {
        Self {
            source,
            constraints: AudioConstraints {
                echo_cancellation: audio.echo_cancellation,
                noise_suppression: audio.noise_suppression,
                auto_gain_control: audio.auto_gain_control,
            },
        }
    }

    /// Request a live input and validate it is usable.
    ///
    /// An input with no tracks, or whose track arrived disabled, is
    /// released and reported as `DeviceUnavailable`.
    pub async fn acquire(&self) -> Result<Arc<dyn AudioInput>, SessionError> {
        debug!(constraints = ?self.constraints, "acquiring audio input");
        let input = self.source.acquire(&self.constraints).await?;

        if input.track_count() == 0 || !input.is_enabled() {
            warn!(
                tracks = input.track_count(),
                enabled = input.is_enabled(),
                "acquired input is not usable"
            );
            input.stop();
            return Err(SessionError::DeviceUnavailable);
        }

        info!(
            tracks = input.track_count(),
            sample_rate = input.sample_rate(),
            "audio input acquired"
        );
        Ok(input)
    }

    /// Stop capture and release the device. Safe to call twice.
    pub fn release(&self, input: &Arc<dyn AudioInput>) {
        if input.is_stopped() {
            return;
        }
        input.stop();
        debug!("audio input released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::watch;

    use voice_client_core::AudioFrame;

    struct FakeInput {
        tracks: usize,
        enabled: AtomicBool,
        stopped: AtomicBool,
        stop_calls: AtomicUsize,
    }

    impl FakeInput {
        fn new(tracks: usize, enabled: bool) -> Arc<Self> {
            Arc::new(Self {
                tracks,
                enabled: AtomicBool::new(enabled),
                stopped: AtomicBool::new(false),
                stop_calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl AudioInput for FakeInput {
        fn track_count(&self) -> usize {
            self.tracks
        }

        fn sample_rate(&self) -> u32 {
            48_000
        }

        fn set_enabled(&self, enabled: bool) {
            self.enabled.store(enabled, Ordering::SeqCst);
        }

        fn is_enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }

        async fn next_frame(&self) -> Option<AudioFrame> {
            None
        }

        fn latest_frame(&self) -> Option<AudioFrame> {
            None
        }

        fn watch_ended(&self) -> watch::Receiver<bool> {
            watch::channel(false).1
        }

        fn stop(&self) {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            self.stopped.store(true, Ordering::SeqCst);
        }

        fn is_stopped(&self) -> bool {
            self.stopped.load(Ordering::SeqCst)
        }
    }

    struct FakeSource {
        input: Arc<FakeInput>,
    }

    #[async_trait]
    impl MediaSource for FakeSource {
        async fn acquire(
            &self,
            _constraints: &AudioConstraints,
        ) -> Result<Arc<dyn AudioInput>, SessionError> {
            Ok(self.input.clone())
        }
    }

    fn acquirer(input: Arc<FakeInput>) -> MediaAcquirer {
        MediaAcquirer::new(Arc::new(FakeSource { input }), &AudioConfig::default())
    }

    #[tokio::test]
    async fn test_acquire_usable_input() {
        let input = FakeInput::new(1, true);
        let acquired = acquirer(input).acquire().await.unwrap();
        assert_eq!(acquired.track_count(), 1);
    }

    #[tokio::test]
    async fn test_acquire_rejects_trackless_input() {
        let input = FakeInput::new(0, true);
        let err = acquirer(input.clone()).acquire().await.err().unwrap();
        assert_eq!(err, SessionError::DeviceUnavailable);
        assert!(input.is_stopped());
    }

    #[tokio::test]
    async fn test_acquire_rejects_disabled_input() {
        let input = FakeInput::new(1, false);
        let err = acquirer(input.clone()).acquire().await.err().unwrap();
        assert_eq!(err, SessionError::DeviceUnavailable);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let input = FakeInput::new(1, true);
        let media = acquirer(input.clone());
        let acquired = media.acquire().await.unwrap();
        media.release(&acquired);
        media.release(&acquired);
        assert_eq!(input.stop_calls.load(Ordering::SeqCst), 1);
    }
}
