//! Seam traits between the session layers
//!
//! The state machine, media layer, and signaling layer meet at these
//! traits. Production wires in the cpal microphone and the WebRTC
//! transport; tests wire in scripted mocks.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::{
    AudioConstraints, AudioFrame, CapabilitySnapshot, ServerEvent, SessionError,
};

/// Inspects the host for realtime-voice prerequisites.
///
/// Must be synchronous and never fail: a missing capability is
/// reported in the snapshot, not raised.
pub trait CapabilityProbe: Send + Sync {
    fn probe(&self) -> CapabilitySnapshot;
}

/// Acquires a live audio input.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Request an input stream honoring the given constraints.
    ///
    /// May suspend indefinitely while the host waits on a user
    /// permission grant; callers do not impose their own timeout.
    async fn acquire(
        &self,
        constraints: &AudioConstraints,
    ) -> Result<Arc<dyn AudioInput>, SessionError>;
}

/// A granted audio input stream.
///
/// The signaling pump pulls frames with `next_frame`; the level
/// monitor taps `latest_frame` concurrently without coordination.
#[async_trait]
pub trait AudioInput: Send + Sync {
    /// Number of audio tracks granted (≥1 for a usable input).
    fn track_count(&self) -> usize;

    /// Capture sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Toggle track enablement. Disabled tracks yield silence
    /// frames, mirroring muted-track semantics.
    fn set_enabled(&self, enabled: bool);

    fn is_enabled(&self) -> bool;

    /// Next captured frame; `None` once the input has ended.
    async fn next_frame(&self) -> Option<AudioFrame>;

    /// Most recent captured frame, if any. Cheap snapshot for the
    /// level monitor.
    fn latest_frame(&self) -> Option<AudioFrame>;

    /// Observe unexpected termination (device unplugged, stream
    /// error). Flips to `true` at most once.
    fn watch_ended(&self) -> watch::Receiver<bool>;

    /// Stop capture and release the device. Idempotent.
    fn stop(&self);

    fn is_stopped(&self) -> bool;
}

/// Everything needed to open one signaling session.
pub struct OpenRequest {
    /// Opaque bearer token, forwarded on each attempt, never stored.
    pub credential: String,
    /// Instruction text sent once the channel opens.
    pub system_prompt: String,
    /// Synthesized-voice identifier.
    pub voice: String,
    /// Local audio relayed to the remote endpoint.
    pub input: Arc<dyn AudioInput>,
}

impl std::fmt::Debug for OpenRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Credential deliberately omitted.
        f.debug_struct("OpenRequest")
            .field("system_prompt_len", &self.system_prompt.len())
            .field("voice", &self.voice)
            .finish()
    }
}

/// Opens signaling sessions against the remote realtime endpoint.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Negotiate one peer connection plus data channel.
    ///
    /// Fails with a specific [`SessionError`] kind for each step:
    /// auth rejection, rate limit, service error, SDP negotiation,
    /// channel-open timeout, or media attach failure.
    async fn open(
        &self,
        request: OpenRequest,
    ) -> Result<Box<dyn SignalingConnection>, SessionError>;
}

/// One live signaling session.
#[async_trait]
pub trait SignalingConnection: Send + Sync {
    /// Send a session update carrying new instruction text.
    ///
    /// Returns `Ok(false)` without sending when the value matches
    /// the last sent one. `ChannelNotOpen` after close.
    async fn send_instructions(&self, text: &str) -> Result<bool, SessionError>;

    /// Send a session update selecting a synthesized voice. Same
    /// dedup and open-state semantics as `send_instructions`.
    async fn send_voice(&self, name: &str) -> Result<bool, SessionError>;

    /// Take the decoded inbound event stream. Yields events in
    /// channel order and ends when the channel closes. `None` once
    /// taken.
    fn take_events(&self) -> Option<mpsc::Receiver<ServerEvent>>;

    /// Take the decoded remote audio stream for playback. Frames
    /// arrive in packet order and the stream ends when the
    /// connection closes. `None` once taken.
    fn take_remote_audio(&self) -> Option<mpsc::Receiver<AudioFrame>>;

    fn is_open(&self) -> bool;

    /// Observe channel/peer teardown: flips to `true` once, whether
    /// the close was local, remote, or an ICE failure.
    fn watch_closed(&self) -> watch::Receiver<bool>;

    /// Close channel and peer connection, release buffers.
    /// Idempotent.
    async fn close(&self);
}
