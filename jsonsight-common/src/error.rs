use std::path::PathBuf;

use thiserror::Error;

/// Failures of the shared configuration and logging helpers.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read config file {}: {source}", path.display())]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON5 in {origin}: {source}")]
    ParseConfig {
        origin: String,
        #[source]
        source: json5::Error,
    },

    #[error("invalid log filter {filter:?}: {reason}")]
    LogFilter { filter: String, reason: String },

    #[error("cannot install the log subscriber: {0}")]
    Subscriber(String),
}

pub type Result<T> = std::result::Result<T, Error>;
