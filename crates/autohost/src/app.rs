//! Application lifecycle: configuration, state loading and subcommands.

use autohost_state::bans::BanEffect;
use autohost_state::table::FieldMap;
use autohost_state::user_data::SmurfReport;
use autohost_state::{StateContext, StateError, StateOptions};
use std::fmt::Write;
use tracing::info;

use crate::cli::{CliArgs, CliCommand, UserArgs};
use crate::config::AppConfig;

/// A configured run of the tool.
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    command: CliCommand,
}

impl Application {
    /// Loads the configuration, applies command-line overrides and
    /// validates the result.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(conf_file) = args.conf_file {
            config.state.conf_file = conf_file.to_string_lossy().to_string();
        }

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }

        if args.json_logs {
            config.logging.json_format = true;
        }

        config.state.macros.extend(args.macros);

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }

        Ok(Self {
            config,
            command: args.command,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Loads the state and runs the subcommand. State loading blocks on
    /// file locks, so it runs on the blocking thread pool.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let options = self.config.to_state_options();
        info!("Bot configuration: {}", options.conf_file.display());
        let command = self.command;
        let output = tokio::task::spawn_blocking(move || execute(options, &command)).await??;
        if !output.is_empty() {
            println!("{output}");
        }
        Ok(())
    }
}

/// Opens the state and runs `command`, returning the text to print.
pub fn execute(options: StateOptions, command: &CliCommand) -> Result<String, StateError> {
    let mut state = StateContext::open(options)?;

    let output = match command {
        CliCommand::Check => format!(
            "Configuration OK: preset \"{}\", {} presets, {} preferences",
            state.settings().preset(),
            state.conf().section_names().count(),
            state.preferences_backend()
        ),
        CliCommand::Presets => list_presets(&state),
        CliCommand::Level(user) => state.access_level(&identity(user)).to_string(),
        CliCommand::BanStatus(user) => describe_ban(&state.user_ban(&identity(user))),
        CliCommand::Smurfs { account_id } => format_smurfs(&state.smurfs(account_id)),
        CliCommand::PruneUserData => {
            let stats = state.flush_user_data()?;
            format!(
                "Removed {} IP links, {} name links, {} accounts",
                stats.ips, stats.names, stats.accounts
            )
        }
    };
    Ok(output)
}

/// Field map describing the user given on the command line.
pub fn identity(user: &UserArgs) -> FieldMap {
    let named = [
        ("accountId", &user.account_id),
        ("name", &user.name),
        ("ip", &user.ip),
    ];
    named
        .into_iter()
        .filter_map(|(field, value)| Some((field.to_string(), value.clone()?)))
        .chain(user.fields.iter().cloned())
        .collect()
}

fn list_presets(state: &StateContext) -> String {
    let current = state.settings().preset();
    let conf = state.conf();
    let mut out = String::new();
    for name in conf.section_names() {
        let marker = if name == current { '*' } else { ' ' };
        let description = conf
            .section(name)
            .and_then(|section| section.first("description"))
            .unwrap_or_default();
        let _ = writeln!(out, "{marker} {name}: {description}");
    }
    out.trim_end().to_string()
}

pub fn describe_ban(effect: &BanEffect) -> String {
    if !effect.is_ban() {
        return "Not banned".to_string();
    }
    let mut out = format!("Banned (type {})", effect.ban_type);
    if let Some(end) = effect.end_date {
        let _ = write!(out, " until {end}");
    }
    if let Some(games) = effect.remaining_games {
        let _ = write!(out, " for {games} more games");
    }
    if !effect.reason.is_empty() {
        let _ = write!(out, ": {}", effect.reason);
    }
    out
}

pub fn format_smurfs(report: &SmurfReport) -> String {
    if report.accounts.is_empty() {
        return "No IP address known for this account".to_string();
    }
    let join = |layer: &[(String, i64)]| layer.iter().map(|(key, _)| key.as_str()).collect::<Vec<_>>().join(", ");
    let mut out = String::new();
    for (depth, accounts) in report.accounts.iter().enumerate() {
        let ips = report.ips.get(depth).map(|layer| join(layer)).unwrap_or_default();
        let _ = writeln!(out, "[{depth}] ips: {ips}");
        let _ = writeln!(out, "[{depth}] accounts: {}", join(accounts));
    }
    out.trim_end().to_string()
}
