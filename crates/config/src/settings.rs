//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::{audio, endpoints, retry, session, timeouts};
use crate::ConfigError;

/// Runtime environment enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Runtime environment (development, staging, production)
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// Voice session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Audio capture and metering configuration
    #[serde(default)]
    pub audio: AudioConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    /// Sanity-check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.max_connect_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.max_connect_attempts".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.session.channel_open_timeout_ms >= self.session.connect_timeout_ms {
            return Err(ConfigError::InvalidValue {
                field: "session.channel_open_timeout_ms".into(),
                message: "must be shorter than connect_timeout_ms".into(),
            });
        }
        if self.audio.fft_size == 0 || !self.audio.fft_size.is_power_of_two() {
            return Err(ConfigError::InvalidValue {
                field: "audio.fft_size".into(),
                message: "must be a nonzero power of two".into(),
            });
        }
        Ok(())
    }
}

/// Voice session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Realtime endpoint for the SDP exchange
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Realtime model requested via query parameter
    #[serde(default = "default_model")]
    pub model: String,

    /// Default synthesized voice
    #[serde(default = "default_voice")]
    pub voice: String,

    /// Input transcription model
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,

    /// Overall connect attempt timeout (ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Data-channel open sub-timeout (ms)
    #[serde(default = "default_channel_open_timeout_ms")]
    pub channel_open_timeout_ms: u64,

    /// Total connect attempts per connect() call
    #[serde(default = "default_max_connect_attempts")]
    pub max_connect_attempts: u32,

    /// Retry backoff base (ms); attempt n waits n × base
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

fn default_endpoint() -> String {
    endpoints::REALTIME_DEFAULT.to_string()
}

fn default_model() -> String {
    endpoints::MODEL_DEFAULT.to_string()
}

fn default_voice() -> String {
    session::VOICE_DEFAULT.to_string()
}

fn default_transcription_model() -> String {
    session::TRANSCRIPTION_MODEL.to_string()
}

fn default_connect_timeout_ms() -> u64 {
    timeouts::CONNECT_MS
}

fn default_channel_open_timeout_ms() -> u64 {
    timeouts::CHANNEL_OPEN_MS
}

fn default_max_connect_attempts() -> u32 {
    retry::MAX_ATTEMPTS
}

fn default_backoff_base_ms() -> u64 {
    retry::BACKOFF_BASE_MS
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            voice: default_voice(),
            transcription_model: default_transcription_model(),
            connect_timeout_ms: default_connect_timeout_ms(),
            channel_open_timeout_ms: default_channel_open_timeout_ms(),
            max_connect_attempts: default_max_connect_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

/// Audio capture and level metering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Request echo cancellation from the capture device
    #[serde(default = "default_true")]
    pub echo_cancellation: bool,

    /// Request noise suppression
    #[serde(default = "default_true")]
    pub noise_suppression: bool,

    /// Request automatic gain control
    #[serde(default = "default_true")]
    pub auto_gain_control: bool,

    /// Spectrum size for the level meter
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,

    /// Level meter sampling interval (ms)
    #[serde(default = "default_level_interval_ms")]
    pub level_interval_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_fft_size() -> usize {
    audio::FFT_SIZE
}

fn default_level_interval_ms() -> u64 {
    audio::LEVEL_INTERVAL_MS
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            fft_size: default_fft_size(),
            level_interval_ms: default_level_interval_ms(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level filter (tracing EnvFilter syntax)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Maximum characters of long payload fields echoed to logs
    #[serde(default = "default_log_field_max_chars")]
    pub log_field_max_chars: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_field_max_chars() -> usize {
    session::LOG_FIELD_MAX_CHARS
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_field_max_chars: default_log_field_max_chars(),
        }
    }
}

/// Load settings with layered sources.
///
/// Priority: env vars > config/{env}.yaml > config/default.yaml >
/// built-in defaults.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOICE_CLIENT")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.session.max_connect_attempts, 3);
        assert_eq!(settings.session.voice, "echo");
        assert!(settings.audio.echo_cancellation);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_attempts() {
        let mut settings = Settings::default();
        settings.session.max_connect_attempts = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_inverted_timeouts() {
        let mut settings = Settings::default();
        settings.session.channel_open_timeout_ms = settings.session.connect_timeout_ms;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_fft_size() {
        let mut settings = Settings::default();
        settings.audio.fft_size = 300;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_session_config_deserializes_with_partial_fields() {
        let parsed: SessionConfig =
            serde_json::from_str(r#"{"voice": "cove"}"#).unwrap();
        assert_eq!(parsed.voice, "cove");
        assert_eq!(parsed.endpoint, crate::constants::endpoints::REALTIME_DEFAULT);
    }
}
