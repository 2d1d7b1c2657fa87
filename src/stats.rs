//! Quality statistics keyed by proxy identity.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::proxy::ProxyId;

/// Accumulated knowledge about one proxy.
#[derive(Debug, Clone, PartialEq)]
pub struct Stat {
    pub id: ProxyId,
    /// Last measured delay. Zero means no successful measurement.
    pub delay: Duration,
    /// Last measured throughput in Mb. Zero means not tested.
    pub speed: f64,
    /// How many times the proxy has been handed out by a provider.
    pub request_count: u64,
}

impl Stat {
    fn new(id: ProxyId) -> Self {
        Self {
            id,
            delay: Duration::ZERO,
            speed: 0.0,
            request_count: 0,
        }
    }
}

/// Registry holding at most one `Stat` per proxy identity.
///
/// Shared between the prober and the filter as `Arc<StatRegistry>`. Every
/// mutation is a find-or-create under a single lock.
#[derive(Debug, Default)]
pub struct StatRegistry {
    stats: Mutex<HashMap<ProxyId, Stat>>,
    speed_exists: AtomicBool,
}

impl StatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, id: &ProxyId) -> Option<Stat> {
        self.stats.lock().get(id).cloned()
    }

    pub fn upsert_delay(&self, id: &ProxyId, delay: Duration) {
        let mut stats = self.stats.lock();
        stats
            .entry(id.clone())
            .or_insert_with(|| Stat::new(id.clone()))
            .delay = delay;
    }

    pub fn upsert_speed(&self, id: &ProxyId, speed: f64) {
        {
            let mut stats = self.stats.lock();
            stats
                .entry(id.clone())
                .or_insert_with(|| Stat::new(id.clone()))
                .speed = speed;
        }
        self.speed_exists.store(true, Ordering::Release);
    }

    pub fn increment_request_count(&self, id: &ProxyId) {
        let mut stats = self.stats.lock();
        stats
            .entry(id.clone())
            .or_insert_with(|| Stat::new(id.clone()))
            .request_count += 1;
    }

    /// Whether any speed value has ever been recorded since the last reset.
    pub fn speed_exists(&self) -> bool {
        self.speed_exists.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.stats.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.lock().is_empty()
    }

    /// Copy of every stat, in no particular order.
    pub fn snapshot(&self) -> Vec<Stat> {
        self.stats.lock().values().cloned().collect()
    }

    /// Drop every stat. Used when the whole pool is rebuilt.
    pub fn reset(&self) {
        self.stats.lock().clear();
        self.speed_exists.store(false, Ordering::Release);
    }

    /// Keep only the stats whose identity satisfies `keep`.
    pub fn retain(&self, mut keep: impl FnMut(&ProxyId) -> bool) {
        self.stats.lock().retain(|id, _| keep(id));
    }
}
