//! Realtime voice session engine
//!
//! Connects a local microphone to a realtime voice model over WebRTC
//! and exposes the call as a small state machine: connect with
//! bounded retry, live transcript aggregation, mute, level metering,
//! and orderly teardown.
//!
//! ```no_run
//! use voice_client_config::Settings;
//! use voice_client_session::VoiceSession;
//!
//! # async fn run() -> Result<(), voice_client_core::SessionError> {
//! let session = VoiceSession::native(Settings::default());
//! session.connect("api-key", "You are a helpful assistant.").await?;
//! session.set_muted(true);
//! session.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod device;
pub mod level;
pub mod media;
pub mod observability;
pub mod session;
pub mod signaling;
pub mod transcript;

pub use device::{CpalMediaSource, NativeCapabilityProbe};
pub use level::AudioLevelMonitor;
pub use media::MediaAcquirer;
pub use observability::{init_tracing, truncate_field};
pub use session::{SessionNotice, SessionState, VoiceSession};
pub use signaling::RealtimeSignaling;
pub use transcript::TranscriptAggregator;
