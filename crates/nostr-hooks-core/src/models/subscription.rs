use std::fmt;
use std::time::Duration;

use nostr_sdk::Filter;
use serde::{Deserialize, Serialize};

use super::filter_set::FilterSetKey;
use crate::constants::DEFAULT_BATCHING_INTERVAL_MS;

/// Opaque subscription identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubId(String);

impl SubId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Per-subscription options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscribeOptions {
    /// Debounce window in milliseconds before a queued batch is dispatched
    pub batching_interval: u64,
    /// Disabled subscriptions are registered but never dispatched
    pub enabled: bool,
    /// Skip batching and the cache, dispatch immediately
    pub force: bool,
    /// Re-query ignoring the cache and refresh siblings with the same filters
    pub invalidate: bool,
    /// Close the network query once it reports EOSE
    pub close_after_eose: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            batching_interval: DEFAULT_BATCHING_INTERVAL_MS,
            enabled: true,
            force: false,
            invalidate: false,
            close_after_eose: true,
        }
    }
}

impl SubscribeOptions {
    pub fn batching_interval(&self) -> Duration {
        Duration::from_millis(self.batching_interval)
    }
}

/// What a consumer asks for: filters (ORed), target relays and options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionConfig {
    pub filters: Vec<Filter>,
    /// Empty means the engine's default relays
    pub relays: Vec<String>,
    pub options: SubscribeOptions,
}

impl SubscriptionConfig {
    pub fn new(filters: Vec<Filter>) -> Self {
        Self {
            filters,
            ..Default::default()
        }
    }

    pub fn relays<I, S>(mut self, relays: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relays = relays.into_iter().map(Into::into).collect();
        self
    }

    pub fn options(mut self, options: SubscribeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn key(&self) -> FilterSetKey {
        FilterSetKey::new(&self.filters)
    }
}

/// Registry entry for a live subscription
#[derive(Debug, Clone)]
pub struct SubscriptionState {
    pub config: SubscriptionConfig,
    pub key: FilterSetKey,
    pub eose: bool,
    pub has_more: bool,
    pub listener_count: usize,
    /// Network queries dispatched for this subscription that have not reported EOSE yet
    pub pending_queries: usize,
}

impl SubscriptionState {
    pub fn new(config: SubscriptionConfig) -> Self {
        let key = config.key();
        Self {
            config,
            key,
            eose: false,
            has_more: false,
            listener_count: 1,
            pending_queries: 0,
        }
    }

    pub fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus {
            eose: self.eose,
            has_more: self.has_more,
            listener_count: self.listener_count,
            pending_queries: self.pending_queries,
        }
    }
}

/// Snapshot of the consumer-visible flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionStatus {
    pub eose: bool,
    pub has_more: bool,
    pub listener_count: usize,
    pub pending_queries: usize,
}
