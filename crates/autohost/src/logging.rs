//! Logging system setup and configuration.
//!
//! This module handles the initialization and configuration of the tracing-based
//! logging system with support for both human-readable and JSON output formats.

use crate::config::LoggingSettings;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Tracing level name for a configured level.
///
/// Accepts tracing level names and the bot's numeric levels: 0 critical,
/// 1 error, 2 warning, 3 notice, 4 info, 5 debug.
pub fn normalize_level(level: &str) -> Option<&'static str> {
    let level = match level.trim().to_ascii_lowercase().as_str() {
        "0" | "1" | "error" => "error",
        "2" | "warn" => "warn",
        "3" | "4" | "info" => "info",
        "5" | "debug" => "debug",
        "trace" => "trace",
        _ => return None,
    };
    Some(level)
}

/// Initializes the logging system with the specified configuration.
///
/// Sets up tracing-subscriber with appropriate formatting, filtering, and output
/// based on the provided logging settings and CLI overrides. `RUST_LOG`
/// takes precedence over the configured level when set.
///
/// # Arguments
///
/// * `config` - Logging configuration from the config file
/// * `json_format` - Whether to force JSON output format (CLI override)
pub fn setup_logging(config: &LoggingSettings, json_format: bool) -> Result<(), Box<dyn std::error::Error>> {
    let log_level = normalize_level(&config.level).ok_or_else(|| format!("Invalid log level: {}", config.level))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if json_format || config.json_format {
        registry
            .with(fmt::layer().json().with_file(false).with_line_number(false).with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    info!("Logging initialized with level: {}", log_level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bot_levels_mapped() {
        assert_eq!(normalize_level("0"), Some("error"));
        assert_eq!(normalize_level("2"), Some("warn"));
        assert_eq!(normalize_level("4"), Some("info"));
        assert_eq!(normalize_level("5"), Some("debug"));
        assert_eq!(normalize_level("DEBUG"), Some("debug"));
        assert_eq!(normalize_level("6"), None);
        assert_eq!(normalize_level("notice"), None);
    }
}
