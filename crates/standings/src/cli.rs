//! Command-line interface for the standings server.

use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;

/// Command line arguments.
///
/// Every option except the config path overrides a value from the
/// configuration file.
#[derive(Debug, Clone)]
pub struct CliArgs {
    pub config_path: PathBuf,
    pub instance_id: Option<String>,
    pub log_level: Option<String>,
    pub json_logs: bool,
}

impl CliArgs {
    pub fn parse() -> Self {
        Self::from_matches(Self::command().get_matches())
    }

    fn command() -> Command {
        Command::new("Standings Server")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Live competitive leaderboards for a horizontally scaled fleet")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("standings.toml"),
            )
            .arg(
                Arg::new("instance-id")
                    .short('i')
                    .long("instance-id")
                    .value_name("ID")
                    .help("Instance identifier stamped on published events"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(ArgAction::SetTrue),
            )
    }

    fn from_matches(matches: clap::ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("standings.toml")),
            instance_id: matches.get_one::<String>("instance-id").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::from_matches(CliArgs::command().try_get_matches_from(args).unwrap())
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["standings"]);
        assert_eq!(args.config_path, PathBuf::from("standings.toml"));
        assert!(args.instance_id.is_none());
        assert!(args.log_level.is_none());
        assert!(!args.json_logs);
    }

    #[test]
    fn test_overrides() {
        let args = parse(&[
            "standings",
            "-c",
            "/etc/standings.toml",
            "--instance-id",
            "eu-west-3",
            "-l",
            "debug",
            "--json-logs",
        ]);
        assert_eq!(args.config_path, PathBuf::from("/etc/standings.toml"));
        assert_eq!(args.instance_id.as_deref(), Some("eu-west-3"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
    }
}
