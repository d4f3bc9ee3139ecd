//! Sweep CLI - the `fieldsweep` runner
//!
//! Resolves settings from a TOML file, environment variables and flags,
//! picks a store backend, and drives one sweep to completion:
//!
//! ```text
//! COLLECTION=users FIELD_KEY=stats.visits PROJECT_ID=acme fieldsweep --rate-limit 20
//! fieldsweep --backend memory --seed-file docs.json --collection users \
//!     --field-key touched_at --update-type CURRENT_TIMESTAMP --summary-json
//! ```
//!
//! Exit status is 0 when every page drained and 1 when the run aborted.

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;

pub use cli::{command, CliArgs};
pub use config::{Backend, BackendKind, CliConfigError, ConfigLayer, RunConfig};
pub use logging::{init_subscriber, Verbosity};
