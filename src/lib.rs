//! # proxy-pool-prober
//!
//! Health probing and provider filtering for a pool of heterogeneous proxies.
//!
//! The [`HealthProber`] tests many proxies concurrently under a fixed
//! concurrency ceiling and records their delay in a shared [`StatRegistry`].
//! The [`filter`](filter::filter) pipeline selects a subset of the pool for a
//! [`FilterQuery`], annotating display names with measured speed.

pub mod adapter;
pub mod config;
pub mod error;
pub mod filter;
pub mod pool;
pub mod prober;
pub mod proxy;
pub mod stats;

pub use adapter::{ProbeHandle, ProxyAdapter, ReqwestAdapter};
pub use config::{ProberConfig, ProberConfigBuilder, DEFAULT_TEST_URL};
pub use error::{ConfigError, ProbeError};
pub use filter::{FilterCode, FilterQuery, RawQuery, SpeedRange, StreamService};
pub use pool::ProxyPool;
pub use prober::{HealthProber, ProbeReport, ProbeSummary};
pub use proxy::{ParamMap, Proxy, ProxyId, ProxyType};
pub use stats::{Stat, StatRegistry};
