//! Command-line interface of the autohost tool.
//!
//! Built with the `clap` builder API. Global options override the TOML
//! configuration; the subcommand selects what to do with the loaded state.

use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

/// Default TOML configuration file
pub const DEFAULT_CONFIG: &str = "autohost.toml";

/// Identity of a user given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserArgs {
    pub account_id: Option<String>,
    pub name: Option<String>,
    pub ip: Option<String>,
    /// Extra `field=value` pairs (`country`, `rank`, `access`, ...)
    pub fields: Vec<(String, String)>,
}

/// What to do once the state is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// Load everything and report problems
    Check,
    /// List the presets of the bot configuration
    Presets,
    /// Access level of a user
    Level(UserArgs),
    /// Ban decision for a user under the default preset
    BanStatus(UserArgs),
    /// Accounts and IPs related to an account
    Smurfs { account_id: String },
    /// Apply the user data retention and write the file
    PruneUserData,
}

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the TOML configuration file
    pub config_path: PathBuf,
    /// Optional override for the bot configuration file
    pub conf_file: Option<PathBuf>,
    /// Optional override for the log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Macros added to the configured ones
    pub macros: Vec<(String, String)>,
    pub command: CliCommand,
}

/// Parses a `name=value` pair.
pub fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim().to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got \"{raw}\"")),
    }
}

fn user_args() -> [Arg; 4] {
    [
        Arg::new("account-id")
            .short('a')
            .long("account-id")
            .value_name("ID")
            .help("Lobby account id"),
        Arg::new("name")
            .short('n')
            .long("name")
            .value_name("NAME")
            .help("Lobby name"),
        Arg::new("ip")
            .long("ip")
            .value_name("ADDRESS")
            .help("IP address"),
        Arg::new("field")
            .short('f')
            .long("field")
            .value_name("FIELD=VALUE")
            .help("Additional user field, can be repeated")
            .action(ArgAction::Append)
            .value_parser(parse_pair),
    ]
}

impl UserArgs {
    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            account_id: matches.get_one::<String>("account-id").cloned(),
            name: matches.get_one::<String>("name").cloned(),
            ip: matches.get_one::<String>("ip").cloned(),
            fields: matches
                .get_many::<(String, String)>("field")
                .map(|pairs| pairs.cloned().collect())
                .unwrap_or_default(),
        }
    }
}

impl CliArgs {
    /// Command-line definition.
    pub fn command() -> Command {
        Command::new("autohost")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Inspect and maintain the configuration and data files of autohost bots")
            .subcommand_required(true)
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .value_parser(clap::value_parser!(PathBuf))
                    .default_value(DEFAULT_CONFIG)
                    .global(true),
            )
            .arg(
                Arg::new("conf-file")
                    .long("conf-file")
                    .value_name("FILE")
                    .help("Bot configuration file, overrides state.conf_file")
                    .value_parser(clap::value_parser!(PathBuf))
                    .global(true),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error or 0-5)")
                    .global(true),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(ArgAction::SetTrue)
                    .global(true),
            )
            .arg(
                Arg::new("macro")
                    .short('m')
                    .long("macro")
                    .value_name("NAME=VALUE")
                    .help("Value substituted for %NAME% in configuration files, can be repeated")
                    .action(ArgAction::Append)
                    .value_parser(parse_pair)
                    .global(true),
            )
            .subcommand(Command::new("check").about("Load the configuration and every dataset"))
            .subcommand(Command::new("presets").about("List presets"))
            .subcommand(Command::new("level").about("Show the access level of a user").args(user_args()))
            .subcommand(
                Command::new("ban-status")
                    .about("Show the ban applying to a user")
                    .args(user_args()),
            )
            .subcommand(
                Command::new("smurfs")
                    .about("Show accounts sharing IP addresses with an account")
                    .arg(Arg::new("account-id").value_name("ID").required(true)),
            )
            .subcommand(Command::new("prune-user-data").about("Apply user data retention"))
    }

    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&Self::command().get_matches())
    }

    /// Parses arguments from an iterator, as [`parse`](Self::parse) does
    /// for the process arguments.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(&Self::command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        let command = match matches.subcommand() {
            Some(("presets", _)) => CliCommand::Presets,
            Some(("level", sub)) => CliCommand::Level(UserArgs::from_matches(sub)),
            Some(("ban-status", sub)) => CliCommand::BanStatus(UserArgs::from_matches(sub)),
            Some(("smurfs", sub)) => CliCommand::Smurfs {
                account_id: sub.get_one::<String>("account-id").cloned().unwrap_or_default(),
            },
            Some(("prune-user-data", _)) => CliCommand::PruneUserData,
            _ => CliCommand::Check,
        };

        Self {
            config_path: matches
                .get_one::<PathBuf>("config")
                .cloned()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG)),
            conf_file: matches.get_one::<PathBuf>("conf-file").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            macros: matches
                .get_many::<(String, String)>("macro")
                .map(|pairs| pairs.cloned().collect())
                .unwrap_or_default(),
            command,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_definition() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_global_options() {
        let args = CliArgs::try_parse_from([
            "autohost",
            "--config",
            "test.toml",
            "-m",
            "etcDir=/opt/etc",
            "--macro",
            "varDir=/opt/var",
            "presets",
            "--json-logs",
        ])
        .unwrap();
        assert_eq!(args.config_path, PathBuf::from("test.toml"));
        assert_eq!(args.command, CliCommand::Presets);
        assert!(args.json_logs);
        assert_eq!(
            args.macros,
            vec![
                ("etcDir".to_string(), "/opt/etc".to_string()),
                ("varDir".to_string(), "/opt/var".to_string())
            ]
        );
    }

    #[test]
    fn test_user_subcommands() {
        let args = CliArgs::try_parse_from(["autohost", "ban-status", "-a", "42", "--name", "Bob", "-f", "country=FR"]).unwrap();
        assert_eq!(args.config_path, PathBuf::from(DEFAULT_CONFIG));
        assert_eq!(
            args.command,
            CliCommand::BanStatus(UserArgs {
                account_id: Some("42".to_string()),
                name: Some("Bob".to_string()),
                ip: None,
                fields: vec![("country".to_string(), "FR".to_string())],
            })
        );

        let args = CliArgs::try_parse_from(["autohost", "smurfs", "42"]).unwrap();
        assert_eq!(
            args.command,
            CliCommand::Smurfs {
                account_id: "42".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(CliArgs::try_parse_from(["autohost"]).is_err());
        assert!(CliArgs::try_parse_from(["autohost", "smurfs"]).is_err());
        assert!(CliArgs::try_parse_from(["autohost", "check", "--macro", "novalue"]).is_err());
        assert!(parse_pair("=x").is_err());
        assert_eq!(parse_pair("a=b=c").unwrap(), ("a".to_string(), "b=c".to_string()));
    }
}
