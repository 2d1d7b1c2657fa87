//! Bounded-concurrency health probing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future;
use log::{debug, error, info};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tokio::time::timeout;

use crate::adapter::ProxyAdapter;
use crate::config::ProberConfig;
use crate::error::ProbeError;
use crate::proxy::Proxy;
use crate::stats::StatRegistry;

/// Counters describing one probe pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeSummary {
    pub total: usize,
    pub reachable: usize,
    pub failed: usize,
    /// Probes that succeeded against an IPv6 server and were left out.
    pub ipv6_skipped: usize,
    /// Probes whose task panicked.
    pub faulted: usize,
}

/// Result of a probe pass.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    /// Reachable proxies, in completion order.
    pub reachable: Vec<Proxy>,
    pub summary: ProbeSummary,
}

enum Outcome {
    Reachable,
    Ipv6Skipped,
    Failed,
}

/// Per-pass settings copied into every probe task.
#[derive(Clone)]
struct ProbeSettings {
    test_url: Arc<str>,
    timeout: Duration,
    fallback_timeout: Duration,
}

/// Aborts every spawned probe when dropped. Tasks that already finished are unaffected.
#[derive(Default)]
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Tests proxies for reachability and records their delay.
pub struct HealthProber {
    config: ProberConfig,
    adapter: Arc<dyn ProxyAdapter>,
    registry: Arc<StatRegistry>,
}

impl HealthProber {
    pub fn new(
        config: ProberConfig,
        adapter: Arc<dyn ProxyAdapter>,
        registry: Arc<StatRegistry>,
    ) -> Self {
        Self {
            config,
            adapter,
            registry,
        }
    }

    pub fn config(&self) -> &ProberConfig {
        &self.config
    }

    /// Probe every proxy and return the reachable IPv4 ones.
    pub async fn probe(&self, proxies: &[Proxy]) -> Vec<Proxy> {
        self.probe_with_report(proxies).await.reachable
    }

    /// Probe every proxy, running at most `concurrency` probes at once, and
    /// wait until all of them have finished.
    ///
    /// Dropping the returned future aborts the probes still in flight.
    pub async fn probe_with_report(&self, proxies: &[Proxy]) -> ProbeReport {
        debug!(
            "Probing {} proxies, concurrency: {}, timeout: {:.2}s",
            proxies.len(),
            self.config.concurrency,
            self.config.timeout.as_secs_f64()
        );

        let settings = ProbeSettings {
            test_url: Arc::from(self.config.test_url.as_str()),
            timeout: self.config.timeout,
            fallback_timeout: self.config.fallback_timeout,
        };
        let reachable = Arc::new(Mutex::new(Vec::with_capacity(proxies.len())));
        let slots = Arc::new(Semaphore::new(self.config.concurrency));
        let mut labels = Vec::with_capacity(proxies.len());
        let mut tasks = Vec::with_capacity(proxies.len());
        // Dropping this pass stops its probes from touching the registry afterwards.
        let mut spawned = AbortOnDrop::default();

        for proxy in proxies {
            // The semaphore is never closed, so acquisition only waits for a free slot.
            let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
                break;
            };
            let proxy = proxy.clone();
            let adapter = Arc::clone(&self.adapter);
            let registry = Arc::clone(&self.registry);
            let reachable = Arc::clone(&reachable);
            let settings = settings.clone();

            labels.push(proxy.to_string());
            let task = tokio::spawn(async move {
                let _permit = permit;
                let result = test_delay(adapter.as_ref(), &proxy, &settings).await;
                let Some(delay) = successful_delay(&proxy, result) else {
                    return Outcome::Failed;
                };
                if proxy.is_ipv6() {
                    debug!("{} reachable over IPv6, not kept", proxy);
                    return Outcome::Ipv6Skipped;
                }
                registry.upsert_delay(&proxy.id(), delay);
                reachable.lock().push(proxy);
                Outcome::Reachable
            });
            spawned.0.push(task.abort_handle());
            tasks.push(task);
        }

        let results = future::join_all(tasks).await;

        let mut summary = ProbeSummary {
            total: proxies.len(),
            ..ProbeSummary::default()
        };
        for (label, result) in labels.iter().zip(results) {
            match result {
                Ok(Outcome::Reachable) => summary.reachable += 1,
                Ok(Outcome::Ipv6Skipped) => summary.ipv6_skipped += 1,
                Ok(Outcome::Failed) => summary.failed += 1,
                Err(e) if e.is_panic() => {
                    error!("Probe of {} panicked: {}", label, e);
                    summary.faulted += 1;
                }
                Err(e) => {
                    error!("Probe of {} was cancelled: {}", label, e);
                    summary.failed += 1;
                }
            }
        }

        let reachable = std::mem::take(&mut *reachable.lock());
        info!(
            "Probe pass completed: {}/{} reachable, {} failed, {} IPv6 skipped, {} faulted",
            summary.reachable, summary.total, summary.failed, summary.ipv6_skipped, summary.faulted
        );

        ProbeReport { reachable, summary }
    }
}

/// Filter a probe result down to a usable delay. A zero delay counts as no result.
pub(crate) fn successful_delay(proxy: &Proxy, result: Result<Duration, ProbeError>) -> Option<Duration> {
    match result {
        Ok(delay) if !delay.is_zero() => Some(delay),
        Ok(_) => {
            debug!("Probe of {} reported no delay", proxy);
            None
        }
        Err(e) => {
            debug!("Probe of {} failed: {}", proxy, e);
            None
        }
    }
}

/// Measure the delay of one proxy through the adapter, or over raw TCP when the
/// adapter cannot handle its type.
async fn test_delay(
    adapter: &dyn ProxyAdapter,
    proxy: &Proxy,
    settings: &ProbeSettings,
) -> Result<Duration, ProbeError> {
    let params = proxy.to_param_map()?;

    if !adapter.supports(&proxy.proxy_type) {
        return tcp_connectivity(&proxy.server, proxy.port, settings.fallback_timeout).await;
    }

    let handle = adapter.parse(&params)?;
    let start = Instant::now();
    match timeout(settings.timeout, handle.http_head(&settings.test_url)).await {
        Ok(Ok(())) => Ok(start.elapsed()),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(ProbeError::Timeout(settings.timeout)),
    }
}

/// Time how long it takes to open a TCP connection to `host:port`.
async fn tcp_connectivity(host: &str, port: u16, limit: Duration) -> Result<Duration, ProbeError> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let start = Instant::now();
    match timeout(limit, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => Ok(start.elapsed()),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(ProbeError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyType;

    fn proxy() -> Proxy {
        Proxy::new("p", ProxyType::Ss, "1.1.1.1", 8388)
    }

    #[test]
    fn zero_delay_is_not_a_result() {
        assert_eq!(successful_delay(&proxy(), Ok(Duration::ZERO)), None);
        assert_eq!(
            successful_delay(&proxy(), Ok(Duration::from_millis(42))),
            Some(Duration::from_millis(42))
        );
        assert_eq!(
            successful_delay(&proxy(), Err(ProbeError::Timeout(Duration::from_secs(1)))),
            None
        );
    }

    #[tokio::test]
    async fn tcp_fallback_measures_connect_time() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let delay = tcp_connectivity("127.0.0.1", port, Duration::from_secs(3))
            .await
            .unwrap();
        assert!(delay < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn tcp_fallback_reports_refused_connections() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = tcp_connectivity("127.0.0.1", port, Duration::from_secs(3)).await;
        assert!(matches!(result, Err(ProbeError::Network(_))));
    }
}
