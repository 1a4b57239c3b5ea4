//! Client configuration at `~/.wtlab/client.toml`.
//!
//! Provides the default endpoint and trust settings. CLI flags always
//! override config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;
use wtlab_client::ClientConfig;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub client: ClientSection,
}

/// `[client]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    /// Default session endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Fingerprint URL; derived from the endpoint when absent.
    #[serde(default)]
    pub fingerprint_url: Option<String>,

    /// Pin the session to the fingerprint served by the endpoint.
    #[serde(default = "default_true")]
    pub pinning: bool,

    /// Connect without pinning when the fingerprint cannot be fetched.
    #[serde(default)]
    pub bootstrap_fallback: bool,

    /// Skip certificate validation when not pinned.
    #[serde(default)]
    pub insecure: bool,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            fingerprint_url: None,
            pinning: true,
            bootstrap_fallback: false,
            insecure: false,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_endpoint() -> String {
    "https://localhost:4433".to_string()
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &str) -> Result<Self> {
        let path = Path::new(path);
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// The library configuration for `endpoint`, or the configured default.
    pub fn client_config(&self, endpoint: Option<&str>) -> ClientConfig {
        let section = &self.client;
        ClientConfig {
            endpoint: endpoint.unwrap_or(&section.endpoint).to_string(),
            fingerprint_url: section.fingerprint_url.clone(),
            pinning: section.pinning,
            pin: None,
            bootstrap_fallback: section.bootstrap_fallback,
            insecure: section.insecure,
            connect_timeout_secs: section.connect_timeout_secs,
        }
    }
}

/// Parse a hex payload such as `0102ff`, `01:02:ff` or `01 02 ff`.
pub fn parse_hex_payload(s: &str) -> Result<Vec<u8>> {
    let cleaned: String = s
        .chars()
        .filter(|c| !matches!(c, ':' | ' ' | '-'))
        .collect();
    let cleaned = cleaned
        .strip_prefix("0x")
        .unwrap_or(&cleaned)
        .to_string();
    if cleaned.is_empty() {
        anyhow::bail!("empty payload");
    }
    hex::decode(&cleaned).with_context(|| format!("invalid hex payload '{s}'"))
}
