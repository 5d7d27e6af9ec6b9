// Logging for chat-tail, powered by tracing-subscriber.
//
// chat-link logs through the `log` facade; `tracing_log::LogTracer` routes
// those records into the subscriber. Output goes to stderr so it never mixes
// with the rendered stream on stdout.

use tracing_subscriber::EnvFilter;

use crate::error::{CLIError, Result};

/// Build the filter from `RUST_LOG` when set, otherwise from the verbosity flag.
fn build_env_filter(verbose: bool) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let level = if verbose { "debug" } else { "warn" };
    let directives = [
        level.to_string(),
        "tungstenite=warn".to_string(),
        "tokio_tungstenite=warn".to_string(),
        "hyper_util=warn".to_string(),
        "reqwest=warn".to_string(),
    ]
    .join(",");

    EnvFilter::try_new(&directives).map_err(|e| {
        CLIError::ConfigurationError(format!("Invalid tracing filter '{}': {}", directives, e))
    })
}

pub fn init_logging(verbose: bool) -> Result<()> {
    let filter = build_env_filter(verbose)?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| CLIError::ConfigurationError(format!("Failed to init logging: {}", e)))?;

    tracing_log::LogTracer::init().ok(); // ok() in case already initialized

    tracing::debug!("logging initialised (verbose={})", verbose);
    Ok(())
}
