//! Error types for the proxy-pool-prober crate.

use std::time::Duration;

use thiserror::Error;

/// Reasons a single probe can fail. None of these escape a probe pass; they are
/// logged and the proxy is left out of the reachable set.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The descriptor is missing a field or carries a field of the wrong kind.
    #[error("malformed descriptor: {0}")]
    MalformedDescriptor(String),
    /// The protocol adapter rejected the parameter map.
    #[error("adapter rejected proxy: {0}")]
    AdapterParse(String),
    /// Dial or request failed.
    #[error("network failure: {0}")]
    Network(String),
    /// The probe did not finish within its deadline.
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    /// The test URL answered with a non-success status.
    #[error("unexpected status {0}")]
    Status(u16),
    /// Opaque failure reported by an adapter implementation.
    #[error(transparent)]
    Adapter(#[from] anyhow::Error),
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            ProbeError::AdapterParse(err.to_string())
        } else {
            ProbeError::Network(err.to_string())
        }
    }
}

impl From<std::io::Error> for ProbeError {
    fn from(err: std::io::Error) -> Self {
        ProbeError::Network(err.to_string())
    }
}

/// Error returned when a prober configuration is unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("probe concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("{0} timeout must be greater than zero")]
    ZeroTimeout(&'static str),
    #[error("invalid test url: {0}")]
    InvalidTestUrl(#[from] url::ParseError),
}
