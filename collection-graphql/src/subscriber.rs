//! Global `tracing` subscriber.

use displaydoc::Display;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::configuration::LogFormat;
use crate::configuration::LoggingConfig;

#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum SubscriberError {
    /// could not parse log filter '{filter}': {message}
    InvalidFilter { filter: String, message: String },
    /// could not install the global subscriber: {0}
    AlreadyInstalled(String),
}

/// Installs the `fmt` subscriber described by `config` as the global default.
///
/// Events go to stderr, stdout is left to command output.
pub fn init(config: &LoggingConfig) -> Result<(), SubscriberError> {
    let filter = EnvFilter::try_new(&config.level).map_err(|e| SubscriberError::InvalidFilter {
        filter: config.level.clone(),
        message: e.to_string(),
    })?;
    let builder = tracing_subscriber::fmt::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| SubscriberError::AlreadyInstalled(e.to_string()))
}
