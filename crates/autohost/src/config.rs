//! Configuration of the autohost tool.
//!
//! The TOML file points at the bot configuration file and provides the
//! macros substituted in it. Everything about the bot itself (presets,
//! shared datasets, retention) lives in the bot configuration.

use autohost_state::shared::LockRetry;
use autohost_state::StateOptions;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::logging::normalize_level;

fn default_lock_retries() -> u32 {
    10
}

fn default_lock_retry_delay_ms() -> u64 {
    100
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where the bot configuration and data live
    pub state: StateSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Bot configuration file and the values made available to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSettings {
    /// Bot configuration file
    pub conf_file: String,
    /// Exposed as the `%etcDir%` macro
    #[serde(default)]
    pub etc_dir: Option<String>,
    /// Exposed as the `%varDir%` macro
    #[serde(default)]
    pub var_dir: Option<String>,
    /// Exposed as the `%instanceDir%` macro
    #[serde(default)]
    pub instance_dir: Option<String>,
    /// Attempts to take a busy lock on a shared file; overrides the bot
    /// configuration when set
    #[serde(default)]
    pub lock_retries: Option<u32>,
    #[serde(default = "default_lock_retry_delay_ms")]
    pub lock_retry_delay_ms: u64,
    /// Wait for locks instead of retrying
    #[serde(default)]
    pub lock_blocking: bool,
    /// Additional macros
    #[serde(default)]
    pub macros: BTreeMap<String, String>,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            conf_file: "etc/autohost.conf".to_string(),
            etc_dir: Some("etc".to_string()),
            var_dir: Some("var".to_string()),
            instance_dir: None,
            lock_retries: None,
            lock_retry_delay_ms: default_lock_retry_delay_ms(),
            lock_blocking: false,
            macros: BTreeMap::new(),
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error) or a bot log
    /// level from 0 to 5
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the specified path
    /// and returns the default configuration.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Macros passed to the configuration loader: the directory settings
    /// under their bot parameter names, then the `macros` table.
    pub fn macros(&self) -> HashMap<String, String> {
        let state = &self.state;
        let dirs = [
            ("etcDir", &state.etc_dir),
            ("varDir", &state.var_dir),
            ("instanceDir", &state.instance_dir),
        ];
        dirs.into_iter()
            .filter_map(|(name, dir)| Some((name.to_string(), dir.clone()?)))
            .chain(state.macros.clone())
            .collect()
    }

    /// Options used to open the state context.
    pub fn to_state_options(&self) -> StateOptions {
        let lock_retry = match (self.state.lock_retries, self.state.lock_blocking) {
            (None, false) => None,
            (attempts, blocking) => Some(LockRetry {
                attempts: attempts.unwrap_or_else(default_lock_retries),
                delay: Duration::from_millis(self.state.lock_retry_delay_ms),
                blocking,
            }),
        };
        StateOptions {
            conf_file: PathBuf::from(&self.state.conf_file),
            macros: self.macros(),
            lock_retry,
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.state.conf_file.trim().is_empty() {
            return Err("state.conf_file cannot be empty".to_string());
        }

        if self.state.lock_retries == Some(0) {
            return Err("state.lock_retries must be greater than 0".to_string());
        }

        if let Some(name) = self
            .state
            .macros
            .keys()
            .find(|name| name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_'))
        {
            return Err(format!("Invalid macro name \"{name}\": only letters, digits and '_' are allowed"));
        }

        if normalize_level(&self.logging.level).is_none() {
            return Err(format!(
                "Invalid log level: {}. Must be one of trace, debug, info, warn, error or 0-5",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.state.conf_file, "etc/autohost.conf");
        assert_eq!(config.logging.level, "info");
        assert!(config.to_state_options().lock_retry.is_none());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = AppConfig::default();
        config.state.conf_file = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.state.lock_retries = Some(0);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.state.macros.insert("bad-name".to_string(), "x".to_string());
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
        config.logging.level = "5".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_macros_and_lock_settings() {
        let toml_content = r#"
[state]
conf_file = "/srv/bot/etc/bot.conf"
etc_dir = "/srv/bot/etc"
var_dir = "/srv/bot/var"
lock_retries = 3
lock_retry_delay_ms = 20

[state.macros]
lobbyName = "Main"
varDir = "/override"
"#;
        let config: AppConfig = toml::from_str(toml_content).unwrap();
        let options = config.to_state_options();
        assert_eq!(options.conf_file, PathBuf::from("/srv/bot/etc/bot.conf"));
        assert_eq!(options.macros["etcDir"], "/srv/bot/etc");
        assert_eq!(options.macros["varDir"], "/override");
        assert_eq!(options.macros["lobbyName"], "Main");
        assert!(!options.macros.contains_key("instanceDir"));
        assert_eq!(
            options.lock_retry,
            Some(LockRetry {
                attempts: 3,
                delay: Duration::from_millis(20),
                blocking: false
            })
        );
        assert_eq!(config.logging.level, "info");
    }

    #[tokio::test]
    async fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autohost.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(config.state.conf_file, "etc/autohost.conf");

        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.state.var_dir.as_deref(), Some("var"));
    }
}
