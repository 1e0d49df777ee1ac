use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Counters for the engine's network and cache activity
#[derive(Debug, Default, Clone)]
pub struct EngineStats {
    /// Records received from the network, by kind
    pub events_by_kind: HashMap<u16, u64>,
    /// Total records received (duplicates included)
    pub total_events: u64,
    pub queries_dispatched: u64,
    pub queries_failed: u64,
    /// Filters submitted by subscribers before batching
    pub filters_before_merge: u64,
    /// Filters actually sent after merging
    pub filters_after_merge: u64,
    pub gc_evictions: u64,
    pub subscriptions_opened: u64,
    pub subscriptions_closed: u64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&mut self, kind: u16) {
        self.total_events += 1;
        *self.events_by_kind.entry(kind).or_insert(0) += 1;
    }

    pub fn record_dispatch(&mut self, filters_before: usize, filters_after: usize) {
        self.queries_dispatched += 1;
        self.filters_before_merge += filters_before as u64;
        self.filters_after_merge += filters_after as u64;
    }

    /// Get list of kinds sorted by count (descending)
    pub fn kinds_by_count(&self) -> Vec<(u16, u64)> {
        let mut kinds: Vec<_> = self.events_by_kind.iter().map(|(&k, &c)| (k, c)).collect();
        kinds.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        kinds
    }

    /// Share of filters removed by merging, 0.0 when nothing was dispatched
    pub fn merge_ratio(&self) -> f64 {
        if self.filters_before_merge == 0 {
            return 0.0;
        }
        1.0 - self.filters_after_merge as f64 / self.filters_before_merge as f64
    }
}

/// Thread-safe wrapper for engine stats
#[derive(Debug, Clone)]
pub struct SharedEngineStats {
    inner: Arc<RwLock<EngineStats>>,
}

impl Default for SharedEngineStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedEngineStats {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(EngineStats::new())),
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut EngineStats)) {
        if let Ok(mut stats) = self.inner.write() {
            f(&mut stats);
        }
    }

    pub fn snapshot(&self) -> EngineStats {
        self.inner.read().map(|s| s.clone()).unwrap_or_default()
    }
}
