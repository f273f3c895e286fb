//! Process-wide log subscriber setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Installs a `tracing` subscriber filtered by `RUST_LOG` (falling back to
/// `default_directive`) and routes `log` records into it.
///
/// Fails if a global subscriber or logger is already installed.
pub fn init_logging(json: bool, default_directive: &str) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|e| format!("Invalid log filter '{}': {}", default_directive, e))?;

    tracing_log::LogTracer::init().map_err(|e| format!("Failed to bridge log records: {}", e))?;

    let result = if json {
        let subscriber = Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            );
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = Registry::default()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr));
        tracing::subscriber::set_global_default(subscriber)
    };
    result.map_err(|e| format!("Failed to install tracing subscriber: {}", e))
}
