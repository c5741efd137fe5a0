//! Session error taxonomy
//!
//! Every failure the voice session can surface is one of these kinds.
//! Retryability and the user-facing message are pure functions of the
//! kind, so the state machine never branches on error strings.

use thiserror::Error;

/// Errors produced by the realtime voice session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Host lacks one of the realtime-voice prerequisites.
    #[error("realtime voice unsupported on this host: {0}")]
    CapabilityUnsupported(String),

    /// Microphone permission was denied.
    #[error("microphone permission denied")]
    PermissionDenied,

    /// No audio input device, or the granted stream carried no track.
    #[error("no audio input device available")]
    DeviceUnavailable,

    /// The input device exists but is held by another consumer.
    #[error("audio input device is busy")]
    DeviceBusy,

    /// The requested audio constraints cannot be satisfied.
    #[error("audio constraints unsatisfiable: {0}")]
    ConstraintsUnsatisfiable(String),

    /// The realtime endpoint rejected the credential (HTTP 401/403).
    #[error("credential rejected by realtime endpoint")]
    Auth,

    /// The realtime endpoint rate limited the request (HTTP 429).
    #[error("realtime endpoint rate limited the request")]
    RateLimited,

    /// The realtime endpoint answered with a server error (HTTP 5xx).
    #[error("realtime endpoint unavailable (HTTP {status})")]
    ServiceUnavailable { status: u16 },

    /// SDP offer/answer exchange was malformed or rejected.
    #[error("SDP negotiation failed: {0}")]
    Negotiation(String),

    /// The signaling data channel never reached the open state.
    #[error("signaling channel never opened")]
    ChannelTimeout,

    /// The overall connect deadline elapsed.
    #[error("connection attempt timed out")]
    ConnectionTimeout,

    /// An established call was lost (remote close, ICE failure).
    #[error("connection dropped: {0}")]
    ConnectionDropped(String),

    /// A control message was sent before open() or after close().
    #[error("signaling channel is not open")]
    ChannelNotOpen,

    /// Local media failure (track attach, encoder, capture loss).
    #[error("media error: {0}")]
    Media(String),

    /// Anything we could not classify.
    #[error("unexpected error: {0}")]
    Unknown(String),
}

impl SessionError {
    /// Whether a fresh connect attempt is worth making automatically.
    ///
    /// Auth and capability/device errors never retry: the outcome
    /// would not change without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited
                | Self::ServiceUnavailable { .. }
                | Self::ConnectionTimeout
                | Self::ChannelTimeout
                | Self::Negotiation(_)
        )
    }

    /// User-facing message for this error kind.
    ///
    /// Total over the taxonomy: a pure lookup, never control flow.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::CapabilityUnsupported(_) => {
                "Voice chat is not supported in this environment."
            }
            Self::PermissionDenied => {
                "Microphone access was denied. Allow microphone use and try again."
            }
            Self::DeviceUnavailable => {
                "No microphone was found. Connect one and try again."
            }
            Self::DeviceBusy => {
                "The microphone is in use by another application."
            }
            Self::ConstraintsUnsatisfiable(_) => {
                "The microphone does not support the required audio settings."
            }
            Self::Auth => "The API key was rejected. Check your credentials.",
            Self::RateLimited => {
                "Too many requests right now. Please wait a moment and retry."
            }
            Self::ServiceUnavailable { .. } => {
                "The voice service is temporarily unavailable."
            }
            Self::Negotiation(_) => "Could not negotiate a voice connection.",
            Self::ChannelTimeout | Self::ConnectionTimeout => {
                "Connecting took too long. Check your network and retry."
            }
            Self::ConnectionDropped(_) => {
                "The voice connection was lost. Reconnect to continue."
            }
            Self::ChannelNotOpen => "The voice session is not connected.",
            Self::Media(_) => "A microphone problem interrupted the session.",
            Self::Unknown(_) => "Something went wrong with the voice session.",
        }
    }
}

/// Convenience alias used across the session crates.
pub type Result<T> = std::result::Result<T, SessionError>;
