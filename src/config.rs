//! Configuration for the health prober.

use std::time::Duration;

use url::Url;

use crate::error::ConfigError;

/// Connectivity-check URL used when none is configured.
pub const DEFAULT_TEST_URL: &str = "https://www.gstatic.com/generate_204";

/// Configuration for a probe pass.
#[derive(Debug, Clone)]
pub struct ProberConfig {
    /// URL requested with HEAD through each proxy.
    pub test_url: String,
    /// Maximum number of probes in flight.
    pub concurrency: usize,
    /// Deadline for a single adapter probe.
    pub timeout: Duration,
    /// Deadline for the raw TCP probe used for adapter-unsupported proxies.
    pub fallback_timeout: Duration,
}

impl ProberConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ProberConfigBuilder {
        ProberConfigBuilder::new()
    }
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            test_url: DEFAULT_TEST_URL.to_string(),
            concurrency: 64,
            timeout: Duration::from_secs(5),
            fallback_timeout: Duration::from_secs(3),
        }
    }
}

/// Builder for `ProberConfig`.
pub struct ProberConfigBuilder {
    test_url: Option<String>,
    concurrency: Option<usize>,
    timeout: Option<Duration>,
    fallback_timeout: Option<Duration>,
}

impl ProberConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            test_url: None,
            concurrency: None,
            timeout: None,
            fallback_timeout: None,
        }
    }

    /// Set the URL requested through each proxy.
    pub fn test_url(mut self, url: impl Into<String>) -> Self {
        self.test_url = Some(url.into());
        self
    }

    /// Set the maximum number of concurrent probes.
    pub fn concurrency(mut self, workers: usize) -> Self {
        self.concurrency = Some(workers);
        self
    }

    /// Set the per-probe timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the timeout of the TCP fallback probe.
    pub fn fallback_timeout(mut self, timeout: Duration) -> Self {
        self.fallback_timeout = Some(timeout);
        self
    }

    /// Build the configuration, rejecting values that would make every probe fail.
    pub fn build(self) -> Result<ProberConfig, ConfigError> {
        let defaults = ProberConfig::default();
        let config = ProberConfig {
            test_url: self.test_url.unwrap_or(defaults.test_url),
            concurrency: self.concurrency.unwrap_or(defaults.concurrency),
            timeout: self.timeout.unwrap_or(defaults.timeout),
            fallback_timeout: self.fallback_timeout.unwrap_or(defaults.fallback_timeout),
        };

        if config.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if config.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("probe"));
        }
        if config.fallback_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("fallback"));
        }
        Url::parse(&config.test_url)?;

        Ok(config)
    }
}

impl Default for ProberConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
