//! Centralized constants for the voice client
//!
//! Single source of truth for timeouts, retry bounds, endpoints, and
//! audio parameters. Settings defaults pull from here instead of
//! hardcoding values in multiple files.

/// Remote realtime endpoint defaults
pub mod endpoints {
    /// OpenAI realtime SDP exchange endpoint
    pub const REALTIME_DEFAULT: &str = "https://api.openai.com/v1/realtime";

    /// Default realtime model
    pub const MODEL_DEFAULT: &str = "gpt-realtime";
}

/// Timeouts (in milliseconds unless noted)
pub mod timeouts {
    /// Overall connect attempt timeout: media attach, SDP exchange,
    /// and channel readiness all complete inside this window
    pub const CONNECT_MS: u64 = 35_000;

    /// Sub-timeout for the data channel reaching the open state
    pub const CHANNEL_OPEN_MS: u64 = 10_000;

    /// Best-effort grace for teardown before giving up on a
    /// sub-resource
    pub const DISCONNECT_GRACE_MS: u64 = 2_000;

    /// ICE disconnect/failure/keepalive tuning (seconds)
    pub const ICE_DISCONNECTED_TIMEOUT_SECS: u64 = 5;
    pub const ICE_FAILED_TIMEOUT_SECS: u64 = 25;
    pub const ICE_KEEPALIVE_INTERVAL_SECS: u64 = 2;
}

/// Automatic retry bounds for transient connect failures
pub mod retry {
    /// Total attempts per external connect() call
    pub const MAX_ATTEMPTS: u32 = 3;

    /// Backoff base; attempt n waits n × this
    pub const BACKOFF_BASE_MS: u64 = 2_000;
}

/// Audio capture and metering parameters
pub mod audio {
    /// Capture sample rate (opus native)
    pub const SAMPLE_RATE_HZ: u32 = 48_000;

    /// Frame duration fed to the encoder
    pub const FRAME_MS: u32 = 20;

    /// Spectrum size for the level meter
    pub const FFT_SIZE: usize = 256;

    /// Level meter sampling interval (~60 Hz animation tick)
    pub const LEVEL_INTERVAL_MS: u64 = 16;
}

/// Session defaults
pub mod session {
    /// Default synthesized voice
    pub const VOICE_DEFAULT: &str = "echo";

    /// Input transcription model requested from the endpoint
    pub const TRANSCRIPTION_MODEL: &str = "whisper-1";

    /// Signaling data channel label
    pub const DATA_CHANNEL_LABEL: &str = "oai-events";

    /// Maximum characters of an instruction payload echoed to logs
    pub const LOG_FIELD_MAX_CHARS: usize = 200;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_bounds_sane() {
        assert!(retry::MAX_ATTEMPTS >= 1);
        assert!(retry::BACKOFF_BASE_MS > 0);
    }

    #[test]
    fn test_frame_length_divides_sample_rate() {
        let frame_len = (audio::SAMPLE_RATE_HZ * audio::FRAME_MS / 1000) as usize;
        assert_eq!(frame_len, 960);
    }

    #[test]
    fn test_channel_open_within_connect_window() {
        assert!(timeouts::CHANNEL_OPEN_MS < timeouts::CONNECT_MS);
    }
}
