//! Proxy pool tying the prober, the stat registry and the filter together.

use crate::adapter::ProxyAdapter;
use crate::config::ProberConfig;
use crate::filter::{self, FilterQuery};
use crate::prober::{HealthProber, ProbeSummary};
use crate::proxy::{Proxy, ProxyId};
use crate::stats::StatRegistry;

use log::{info, warn};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

/// Pool contents together with the rebuild they belong to.
struct Snapshot {
    /// Bumped by every `replace`.
    generation: u64,
    proxies: Vec<Proxy>,
}

/// A pool of proxies probed for health and served through filtered views.
///
/// Lock order: the snapshot lock is always taken before the registry lock.
pub struct ProxyPool {
    /// Current pool snapshot.
    snapshot: RwLock<Snapshot>,
    /// Statistics shared by the prober and the filter.
    registry: Arc<StatRegistry>,
    prober: HealthProber,
}

impl ProxyPool {
    /// Create an empty pool.
    pub fn new(config: ProberConfig, adapter: Arc<dyn ProxyAdapter>) -> Arc<Self> {
        let registry = Arc::new(StatRegistry::new());
        let prober = HealthProber::new(config, adapter, Arc::clone(&registry));
        Arc::new(Self {
            snapshot: RwLock::new(Snapshot {
                generation: 0,
                proxies: Vec::new(),
            }),
            registry,
            prober,
        })
    }

    /// Rebuild the pool from freshly crawled proxies. Previous statistics are dropped.
    pub fn replace(&self, proxies: Vec<Proxy>) {
        info!("Rebuilding proxy pool with {} proxies", proxies.len());
        let mut snapshot = self.snapshot.write();
        self.registry.reset();
        snapshot.generation += 1;
        snapshot.proxies = proxies;
    }

    /// Probe every proxy in the pool and drop the unreachable ones.
    ///
    /// The pool is not locked while probing. Reachable proxies are matched
    /// back into the current pool by identity, so names rewritten meanwhile
    /// survive. If the pool was rebuilt during the pass, the result is
    /// discarded along with any stats it recorded for proxies no longer pooled.
    pub async fn check_all_proxies(&self) -> ProbeSummary {
        let (generation, proxies) = {
            let snapshot = self.snapshot.read();
            (snapshot.generation, snapshot.proxies.clone())
        };
        if proxies.is_empty() {
            warn!("Proxy pool is empty, nothing to check");
            return ProbeSummary::default();
        }

        let report = self.prober.probe_with_report(&proxies).await;

        {
            let mut snapshot = self.snapshot.write();
            if snapshot.generation != generation {
                let pooled: HashSet<ProxyId> = snapshot.proxies.iter().map(Proxy::id).collect();
                self.registry.retain(|id| pooled.contains(id));
                warn!("Proxy pool was rebuilt during the health check, discarding its result");
                return report.summary;
            }
            let reachable: HashSet<ProxyId> = report.reachable.iter().map(Proxy::id).collect();
            snapshot.proxies.retain(|proxy| reachable.contains(&proxy.id()));
        }

        let (total, tracked) = self.get_stats();
        info!("Proxy pool status: {} proxies, {} tracked stats", total, tracked);
        report.summary
    }

    /// Filtered view of the pool. Names in the pool are updated with speed annotations.
    pub fn provide(&self, query: &FilterQuery) -> Vec<Proxy> {
        let mut snapshot = self.snapshot.write();
        filter::filter(&mut snapshot.proxies, query, &self.registry)
    }

    /// Copy of the current pool.
    pub fn proxies(&self) -> Vec<Proxy> {
        self.snapshot.read().proxies.clone()
    }

    pub fn registry(&self) -> &Arc<StatRegistry> {
        &self.registry
    }

    /// Get statistics about the pool: (proxies, tracked stats).
    pub fn get_stats(&self) -> (usize, usize) {
        let proxies = self.snapshot.read().proxies.len();
        (proxies, self.registry.len())
    }
}
