//! Core traits and types for the realtime voice client
//!
//! This crate provides the foundational pieces shared by the session
//! crates:
//! - The session error taxonomy with retryability and user messages
//! - The decoded signaling event model (inbound and outbound)
//! - Transcript message types
//! - Capability snapshot for pre-connect gating
//! - Seam traits for media acquisition and signaling transport

pub mod audio;
pub mod capability;
pub mod error;
pub mod events;
pub mod message;
pub mod traits;

pub use audio::{AudioConstraints, AudioFrame};
pub use capability::CapabilitySnapshot;
pub use error::{Result, SessionError};
pub use events::{ClientEvent, ServerEvent, SessionPatch, TranscriptionSettings};
pub use message::{Role, TranscriptMessage};
pub use traits::{
    AudioInput, CapabilityProbe, MediaSource, OpenRequest, SignalingConnection,
    SignalingTransport,
};

/// Current time as epoch milliseconds.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
