//! Server startup errors.

use crate::notifier::NotifierError;

/// Errors that prevent the server from starting.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Listener bind or address lookup failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Notifier backend could not be started.
    #[error("notifier error: {0}")]
    Notifier(#[from] NotifierError),

    /// MTA-STS HTTP client could not be built.
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Metrics recorder could not be installed.
    #[error("metrics error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// Result alias for server setup.
pub type Result<T> = std::result::Result<T, ServerError>;
