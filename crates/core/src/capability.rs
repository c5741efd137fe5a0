//! Host capability snapshot
//!
//! Realtime voice needs three things from the host: a peer-connection
//! implementation, microphone capture, and audio processing for level
//! metering. The probe reports what is present; absence is data, not
//! an error.

use serde::{Deserialize, Serialize};

/// Immutable record of the three realtime-voice prerequisites.
///
/// Computed fresh on each probe; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    /// Peer-connection (WebRTC) support.
    pub peer_connection: bool,
    /// Microphone capture support.
    pub media_capture: bool,
    /// Audio-processing (spectrum analysis) support.
    pub audio_processing: bool,
}

impl CapabilitySnapshot {
    /// All three prerequisites present.
    pub fn supported(&self) -> bool {
        self.peer_connection && self.media_capture && self.audio_processing
    }

    /// Human-readable capability details, for diagnostics and the
    /// unsupported-host error message.
    pub fn details(&self) -> String {
        fn yes_no(b: bool) -> &'static str {
            if b {
                "yes"
            } else {
                "no"
            }
        }
        format!(
            "peer connection: {}, media capture: {}, audio processing: {}",
            yes_no(self.peer_connection),
            yes_no(self.media_capture),
            yes_no(self.audio_processing),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_requires_all_three() {
        let full = CapabilitySnapshot {
            peer_connection: true,
            media_capture: true,
            audio_processing: true,
        };
        assert!(full.supported());

        let no_mic = CapabilitySnapshot {
            media_capture: false,
            ..full
        };
        assert!(!no_mic.supported());
    }

    #[test]
    fn test_details_mentions_missing_capability() {
        let snapshot = CapabilitySnapshot {
            peer_connection: true,
            media_capture: false,
            audio_processing: true,
        };
        assert!(snapshot.details().contains("media capture: no"));
    }
}
