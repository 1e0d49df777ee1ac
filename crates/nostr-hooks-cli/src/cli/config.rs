use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nostr_hooks_core::constants::DEFAULT_RELAYS;
use nostr_hooks_core::EngineConfig;
use serde::{Deserialize, Serialize};

/// CLI configuration that can be loaded from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CliConfig {
    /// Relays to query and publish to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relays: Vec<String>,

    /// nsec or hex secret key used by `publish`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,

    /// Batching window in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batching_interval: Option<u64>,

    /// Debug log file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl CliConfig {
    /// Load config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: CliConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize config")
    }

    /// `~/.config/nostr-hooks/config.json` (platform equivalent)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("nostr-hooks").join("config.json"))
    }

    /// Explicit path, else the default path when it exists, else defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Command-line relays win over configured ones, which win over the built-in list.
    pub fn effective_relays(&self, overrides: &[String]) -> Vec<String> {
        if !overrides.is_empty() {
            return overrides.to_vec();
        }
        if !self.relays.is_empty() {
            return self.relays.clone();
        }
        DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect()
    }

    pub fn engine_config(&self, relay_overrides: &[String]) -> EngineConfig {
        let mut config =
            EngineConfig::default().with_relays(self.effective_relays(relay_overrides));
        if let Some(interval) = self.batching_interval {
            config.default_options.batching_interval = interval;
        }
        config
    }
}
