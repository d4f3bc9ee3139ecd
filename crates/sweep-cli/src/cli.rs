//! Command-line definition

use crate::config::{BackendKind, ConfigLayer};
use crate::logging::Verbosity;
use clap::builder::BoolishValueParser;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

/// Build the `fieldsweep` command
#[must_use]
pub fn command() -> Command {
    Command::new("fieldsweep")
        .version(sweep_core::VERSION)
        .about("Rewrite one field on every document of a collection, rate-limited")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("TOML settings file; env vars and flags override it"),
        )
        .arg(
            Arg::new("project-id")
                .long("project-id")
                .env("PROJECT_ID")
                .help("Store project"),
        )
        .arg(
            Arg::new("database-id")
                .long("database-id")
                .env("DATABASE_ID")
                .help("Store database [default: (default)]"),
        )
        .arg(
            Arg::new("collection")
                .long("collection")
                .env("COLLECTION")
                .help("Collection to scan"),
        )
        .arg(
            Arg::new("field-key")
                .long("field-key")
                .env("FIELD_KEY")
                .help("Dotted path of the field to update"),
        )
        .arg(
            Arg::new("batch-size")
                .long("batch-size")
                .env("BATCH_SIZE")
                .value_parser(value_parser!(usize))
                .help("Documents per page [default: 100]"),
        )
        .arg(
            Arg::new("rate-limit")
                .long("rate-limit")
                .env("RATE_LIMIT")
                .value_parser(value_parser!(f64))
                .help("Maximum updates per second [default: 50]"),
        )
        .arg(
            Arg::new("atomic-updates")
                .long("atomic-updates")
                .env("ATOMIC_UPDATES")
                .num_args(0..=1)
                .default_missing_value("true")
                .value_parser(BoolishValueParser::new())
                .help("Update inside a transaction, skipping documents deleted since the fetch"),
        )
        .arg(
            Arg::new("update-type")
                .long("update-type")
                .env("UPDATE_TYPE")
                .help("INCREMENT, CURRENT_TIMESTAMP or START_TIMESTAMP [default: INCREMENT]"),
        )
        .arg(
            Arg::new("timeout-secs")
                .long("timeout-secs")
                .env("RUN_TIMEOUT_SECS")
                .value_parser(value_parser!(u64))
                .help("Cancel the run after this many seconds"),
        )
        .arg(
            Arg::new("emulator-host")
                .long("emulator-host")
                .env("FIRESTORE_EMULATOR_HOST")
                .help("host:port of a local Firestore emulator"),
        )
        .arg(
            Arg::new("access-token")
                .long("access-token")
                .env("FIRESTORE_ACCESS_TOKEN")
                .hide_env_values(true)
                .help("OAuth 2.0 bearer token"),
        )
        .arg(
            Arg::new("backend")
                .long("backend")
                .value_parser(["firestore", "memory"])
                .help("Store backend [default: firestore]"),
        )
        .arg(
            Arg::new("seed-file")
                .long("seed-file")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("JSON documents for the memory backend"),
        )
        .arg(
            Arg::new("summary-json")
                .long("summary-json")
                .action(ArgAction::SetTrue)
                .help("Print the run summary as JSON on stdout"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Debug logging"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Only warnings and errors"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .action(ArgAction::SetTrue)
                .help("Structured JSON logs on stderr"),
        )
}

/// Everything parsed from the command line
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Optional settings file
    pub config_file: Option<PathBuf>,
    /// Env and flag layer
    pub layer: ConfigLayer,
    /// Log verbosity
    pub verbosity: Verbosity,
    /// JSON log format
    pub log_json: bool,
    /// Print summary JSON
    pub summary_json: bool,
}

impl CliArgs {
    /// Extract from parsed matches
    #[must_use]
    pub fn from_matches(matches: &ArgMatches) -> Self {
        let string = |id: &str| matches.get_one::<String>(id).cloned();

        let layer = ConfigLayer {
            project_id: string("project-id"),
            database_id: string("database-id"),
            collection: string("collection"),
            field_key: string("field-key"),
            batch_size: matches.get_one::<usize>("batch-size").copied(),
            rate_limit: matches.get_one::<f64>("rate-limit").copied(),
            atomic_updates: matches.get_one::<bool>("atomic-updates").copied(),
            update_type: string("update-type"),
            timeout_secs: matches.get_one::<u64>("timeout-secs").copied(),
            emulator_host: string("emulator-host"),
            access_token: string("access-token"),
            backend: matches
                .get_one::<String>("backend")
                .and_then(|name| name.parse::<BackendKind>().ok()),
            seed_file: matches.get_one::<PathBuf>("seed-file").cloned(),
        };

        Self {
            config_file: matches.get_one::<PathBuf>("config").cloned(),
            layer,
            verbosity: Verbosity::from_flags(matches.get_flag("verbose"), matches.get_flag("quiet")),
            log_json: matches.get_flag("log-json"),
            summary_json: matches.get_flag("summary-json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        let matches = command()
            .try_get_matches_from(std::iter::once("fieldsweep").chain(args.iter().copied()))
            .unwrap();
        CliArgs::from_matches(&matches)
    }

    #[test]
    fn command_is_well_formed() {
        command().debug_assert();
    }

    #[test]
    fn flags_fill_the_layer() {
        let args = parse(&[
            "--collection",
            "users",
            "--field-key",
            "stats.visits",
            "--batch-size",
            "20",
            "--rate-limit",
            "7.5",
            "--atomic-updates",
            "--backend",
            "memory",
            "--summary-json",
            "-v",
        ]);

        assert_eq!(args.layer.collection.as_deref(), Some("users"));
        assert_eq!(args.layer.field_key.as_deref(), Some("stats.visits"));
        assert_eq!(args.layer.batch_size, Some(20));
        assert_eq!(args.layer.rate_limit, Some(7.5));
        assert_eq!(args.layer.atomic_updates, Some(true));
        assert_eq!(args.layer.backend, Some(BackendKind::Memory));
        assert!(args.summary_json);
        assert_eq!(args.verbosity, Verbosity::Verbose);
    }

    #[test]
    fn atomic_flag_accepts_explicit_values() {
        let args = parse(&["--atomic-updates", "false"]);
        assert_eq!(args.layer.atomic_updates, Some(false));

        let args = parse(&["--atomic-updates=1"]);
        assert_eq!(args.layer.atomic_updates, Some(true));
    }

    #[test]
    fn rejects_malformed_numbers() {
        assert!(command()
            .try_get_matches_from(["fieldsweep", "--batch-size", "ten"])
            .is_err());
        assert!(command()
            .try_get_matches_from(["fieldsweep", "--backend", "sqlite"])
            .is_err());
    }
}
