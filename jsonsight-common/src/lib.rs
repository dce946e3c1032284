//! Shared plumbing for the jsonsight exporter: JSON5 configuration loading,
//! the `logging` configuration section and log subscriber setup.

pub mod config;
pub mod error;

pub use config::{LogFormat, LoggingConfig, load_config, parse_config};
pub use error::{Error, Result};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Install the global log subscriber.
///
/// `RUST_LOG`, when set, replaces `config.level`. In `json` format every event
/// is one JSON object with its fields flattened, which keeps the
/// `metric`/`path`/`error` fields of extraction warnings queryable.
///
/// ```ignore
/// let logging = LoggingConfig { level: "jsonsight_exporter=debug".into(), format: LogFormat::Json };
/// jsonsight_common::init_tracing(&logging)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = log_filter(&config.level)?;

    let output: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Text => fmt::layer().boxed(),
        LogFormat::Json => fmt::layer().json().flatten_event(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .map_err(|e| Error::Subscriber(e.to_string()))
}

/// The filter from `RUST_LOG`, or from the configured level directives.
fn log_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|e| Error::LogFilter {
        filter: level.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_accepts_directives() {
        assert!(log_filter("info").is_ok());
        assert!(log_filter("warn,jsonsight_exporter=debug").is_ok());
    }
}
