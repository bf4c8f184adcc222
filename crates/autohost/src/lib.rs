//! # Autohost - State Maintenance Tool
//!
//! Command-line entry point around the autohost state layer. It loads the
//! bot configuration with its presets, rule files and datasets exactly as a
//! bot instance would, then runs one inspection or maintenance command.
//!
//! ## Quick Start
//!
//! ```bash
//! # Check the configuration pointed at by autohost.toml
//! autohost check
//!
//! # Use another bot configuration and extra macros
//! autohost --conf-file etc/test.conf --macro lobbyName=Test presets
//!
//! # Query the state
//! autohost level --account-id 42 --name Bob
//! autohost ban-status --name Bob --ip 10.0.0.1
//! autohost smurfs 42
//!
//! # Apply the user data retention
//! autohost prune-user-data
//! ```
//!
//! ## Configuration
//!
//! The tool reads a TOML file (default: `autohost.toml`) naming the bot
//! configuration file and the macros substituted in it. If the file doesn't
//! exist, a default configuration will be created.

use tracing::error;

mod app;
mod cli;
mod config;
mod logging;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Main entry point of the tool.
///
/// # Exit Codes
///
/// * **0**: Command completed
/// * **1**: Error during configuration, state loading or the command
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Logging settings come from the config file before it is validated
    let mut logging_settings = AppConfig::load_from_file(&args.config_path)
        .await
        .map(|config| config.logging)
        .unwrap_or_default();
    if let Some(level) = &args.log_level {
        logging_settings.level = level.clone();
    }

    if let Err(e) = logging::setup_logging(&logging_settings, args.json_logs) {
        eprintln!("Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("Command failed: {e}");
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("Failed to start: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}

pub use app::{describe_ban, execute, format_smurfs, identity};
pub use cli::{CliCommand, UserArgs};
pub use config::{LoggingSettings, StateSettings};

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const BOT_CONF: &str = "\
lobbyLogin: TestBot
lobbyPassword: secret
etcDir: %etcDir%
varDir: %varDir%
defaultPreset: ffa

[ffa]
description: Free for all
nbTeams: 16

[duel<ffa>]
description: One versus one
nbTeams: 2
";

    #[tokio::test]
    async fn test_application_runs_commands() {
        let dir = tempfile::tempdir().unwrap();
        let etc = dir.path().join("etc");
        let var = dir.path().join("var");
        fs::create_dir_all(&etc).unwrap();
        fs::create_dir_all(&var).unwrap();
        fs::write(etc.join("autohost.conf"), BOT_CONF).unwrap();
        fs::write(etc.join("users.conf"), "#?name|level\nBob|100\n").unwrap();

        let config_path = dir.path().join("autohost.toml");
        let mut config = AppConfig::default();
        config.state.conf_file = etc.join("autohost.conf").to_string_lossy().to_string();
        config.state.etc_dir = Some(etc.to_string_lossy().to_string());
        config.state.var_dir = Some(var.to_string_lossy().to_string());
        fs::write(&config_path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let args = CliArgs::try_parse_from(["autohost", "--config", config_path.to_str().unwrap(), "presets"]).unwrap();
        let app = Application::new(args).await.unwrap();
        assert_eq!(app.config().state.etc_dir, config.state.etc_dir);

        let options = app.config().to_state_options();
        let presets = tokio::task::spawn_blocking(move || execute(options, &CliCommand::Presets))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(presets, "  duel: One versus one\n* ffa: Free for all");

        let options = app.config().to_state_options();
        let level = execute(
            options,
            &CliCommand::Level(UserArgs {
                name: Some("Bob".to_string()),
                ..UserArgs::default()
            }),
        )
        .unwrap();
        assert_eq!(level, "100");

        let options = app.config().to_state_options();
        let pruned = execute(options, &CliCommand::PruneUserData).unwrap();
        assert!(pruned.starts_with("Removed 0 IP links"));
        assert!(var.join("userData.dat").exists());
    }

    #[tokio::test]
    async fn test_invalid_override_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("autohost.toml");
        let args = CliArgs::try_parse_from([
            "autohost",
            "--config",
            config_path.to_str().unwrap(),
            "--log-level",
            "loud",
            "check",
        ])
        .unwrap();
        assert!(Application::new(args).await.is_err());
        assert!(config_path.exists());
    }
}
