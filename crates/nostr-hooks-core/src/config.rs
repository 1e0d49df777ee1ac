use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_RELAYS, GC_DELAY_MS};
use crate::models::SubscribeOptions;

/// Engine configuration, loadable from a JSON file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Relays for subscriptions and publishes that name none
    pub default_relays: Vec<String>,
    /// Delay before unreferenced cache entries are swept
    pub gc_delay_ms: u64,
    /// Whether records delivered to a forced subscription land in the shared
    /// cache where other subscriptions can reuse them
    pub share_forced_results: bool,
    /// Options for subscriptions built with `SubscriptionEngine::config_for`
    pub default_options: SubscribeOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_relays: DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect(),
            gc_delay_ms: GC_DELAY_MS,
            share_forced_results: true,
            default_options: SubscribeOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Load config from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize engine config")
    }

    pub fn with_relays<I, S>(mut self, relays: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_relays = relays.into_iter().map(Into::into).collect();
        self
    }

    pub fn gc_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.gc_delay_ms)
    }
}
