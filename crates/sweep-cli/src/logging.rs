//! Tracing subscriber initialization for the `fieldsweep` binary
//!
//! Filter priority, highest first:
//! 1. `SWEEP_LOG` (per-target directives, e.g. `sweep_core=debug,warn`)
//! 2. `RUST_LOG`
//! 3. `-v` / `-q` flags
//! 4. `info`
//!
//! Output always goes to stderr so `--summary-json` owns stdout.

use tracing::Level;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Project-specific filter variable
pub const LOG_ENV: &str = "SWEEP_LOG";

/// Verbosity level derived from CLI flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// `-q`: warnings and errors
    Quiet,
    /// Per-document and per-page events
    Normal,
    /// `-v`: debug output from the sweep crates
    Verbose,
}

impl Verbosity {
    /// From parsed flags; verbose wins if both are set
    #[must_use]
    pub const fn from_flags(verbose: bool, quiet: bool) -> Self {
        if verbose {
            Self::Verbose
        } else if quiet {
            Self::Quiet
        } else {
            Self::Normal
        }
    }

    /// Default level when no env filter is set
    #[must_use]
    pub const fn default_level(self) -> Level {
        match self {
            Self::Quiet => Level::WARN,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
        }
    }
}

/// Install the global subscriber. Call once, before config loading.
///
/// # Panics
///
/// Panics if a global subscriber is already set.
pub fn init_subscriber(verbosity: Verbosity, json: bool) {
    let filter = build_env_filter(verbosity);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .init();
        return;
    }

    let ansi = std::io::IsTerminal::is_terminal(&std::io::stderr());
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(ansi)
                .with_target(verbosity == Verbosity::Verbose),
        )
        .init();
}

fn build_env_filter(verbosity: Verbosity) -> EnvFilter {
    // Unparseable values fall through rather than failing the run
    if let Some(filter) = std::env::var(LOG_ENV)
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
    {
        return filter;
    }

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let level = verbosity.default_level();
    let directive = if verbosity == Verbosity::Verbose {
        format!("warn,sweep_core={level},sweep_firestore={level},sweep_cli={level}")
    } else {
        level.to_string()
    };

    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}
