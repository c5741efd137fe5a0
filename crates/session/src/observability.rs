//! Tracing setup and log-field helpers

use std::borrow::Cow;

use tracing_subscriber::EnvFilter;

use voice_client_config::ObservabilityConfig;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. Safe to call more than
/// once; later calls are no-ops.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}

/// Truncate a long payload field for logging.
///
/// Instruction prompts run to thousands of characters; log lines
/// carry a bounded prefix plus the full length instead.
pub fn truncate_field(value: &str, max_chars: usize) -> Cow<'_, str> {
    let total = value.chars().count();
    if total <= max_chars {
        return Cow::Borrowed(value);
    }
    let prefix: String = value.chars().take(max_chars).collect();
    Cow::Owned(format!("{prefix}... [{total} chars]"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_field_passes_through() {
        assert_eq!(truncate_field("hello", 10), "hello");
    }

    #[test]
    fn test_long_field_is_truncated_with_length() {
        let long = "a".repeat(500);
        let shown = truncate_field(&long, 20);
        assert!(shown.starts_with(&"a".repeat(20)));
        assert!(shown.contains("[500 chars]"));
        assert!(shown.len() < 60);
    }

    #[test]
    fn test_truncation_is_char_safe() {
        // Multibyte input must not split a code point.
        let text = "é".repeat(30);
        let shown = truncate_field(&text, 10);
        assert!(shown.starts_with(&"é".repeat(10)));
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        let config = ObservabilityConfig::default();
        init_tracing(&config);
        init_tracing(&config);
    }
}
