//! Logging setup for the binary.
//!
//! Library code logs through the `log` macros; `LogTracer` forwards those
//! records into the `tracing` subscriber installed here, so they share
//! filtering, formatting and span context with the conversion spans.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use crate::config::LogSettings;
use crate::error::LoggingError;

/// Builds the filter: `RUST_LOG` when set, otherwise the configured level.
pub fn build_filter(level: &str, rust_log: Option<&str>) -> Result<EnvFilter, LoggingError> {
    let directive = rust_log
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(level);
    EnvFilter::try_new(directive).map_err(|e| LoggingError::Filter {
        directive: directive.to_string(),
        reason: e.to_string(),
    })
}

/// Installs the global subscriber. Output goes to stderr so command output
/// on stdout stays clean.
pub fn init_logging(settings: &LogSettings) -> Result<(), LoggingError> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = build_filter(&settings.level, rust_log.as_deref())?;

    let (text_layer, json_layer) = if settings.json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_span_list(true);
        (None, Some(layer))
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE);
        (Some(layer), None)
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| LoggingError::Install(e.to_string()))?;
    tracing_log::LogTracer::init().map_err(|e| LoggingError::Install(e.to_string()))?;

    tracing::debug!(level = %settings.level, json = settings.json, "Logging initialized");
    Ok(())
}
