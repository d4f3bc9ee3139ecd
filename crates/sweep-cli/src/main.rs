//! `fieldsweep` entry point

use anyhow::Context;
use sweep_cli::{app, command, init_subscriber, CliArgs, ConfigLayer};
use sweep_core::SweepError;

#[tokio::main]
async fn main() {
    let args = CliArgs::from_matches(&command().get_matches());
    init_subscriber(args.verbosity, args.log_json);

    let code = match execute(args).await {
        Ok(clean) => {
            if !clean {
                tracing::warn!("some documents failed to update");
            }
            0
        }
        Err(e) if e.downcast_ref::<SweepError>().is_some_and(SweepError::is_cancellation) => {
            tracing::warn!(error = %e, "sweep stopped before completion");
            eprintln!("error: {e:#}");
            1
        }
        Err(e) => {
            tracing::error!(error = format!("{e:#}"), "sweep failed");
            eprintln!("error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

/// Returns whether every visited document was applied or skipped
async fn execute(args: CliArgs) -> anyhow::Result<bool> {
    let file = match &args.config_file {
        Some(path) => ConfigLayer::load(path)?,
        None => ConfigLayer::default(),
    };
    let config = file.merge(args.layer).resolve()?;

    tracing::info!(
        collection = %config.settings.collection,
        field = %config.settings.field,
        batch_size = config.settings.batch_size,
        rate_limit = config.settings.rate_limit,
        mode = %config.settings.update_mode,
        update_type = %config.settings.update_type,
        "configuration resolved"
    );

    let store = app::build_store(&config.backend)?;
    let summary = app::run(config, store).await?;

    if args.summary_json {
        let json = serde_json::to_string_pretty(&summary).context("failed to encode summary")?;
        println!("{json}");
    }
    Ok(summary.is_clean())
}
