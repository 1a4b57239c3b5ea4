//! Server configuration: TOML file + CLI overrides.

use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use wtlab_core::{WtError, WtResult};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    /// Host name clients use to reach the server (logged, not bound).
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// WebTransport (UDP) port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Fingerprint endpoint (TCP) port.
    #[serde(default = "default_port")]
    pub http_port: u16,
    #[serde(default = "default_cert_path")]
    pub cert: String,
    #[serde(default = "default_key_path")]
    pub key: String,
    /// Only session requests for this path are accepted.
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_write_interval_ms")]
    pub write_interval_ms: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_cert_validity_days")]
    pub cert_validity_days: u32,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            bind: default_bind(),
            port: default_port(),
            http_port: default_port(),
            cert: default_cert_path(),
            key: default_key_path(),
            path: default_path(),
            write_interval_ms: default_write_interval_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            cert_validity_days: default_cert_validity_days(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    4433
}
fn default_cert_path() -> String {
    "~/.wtlab/cert.pem".to_string()
}
fn default_key_path() -> String {
    "~/.wtlab/key.pem".to_string()
}
fn default_path() -> String {
    "/".to_string()
}
fn default_write_interval_ms() -> u64 {
    30
}
fn default_shutdown_grace_secs() -> u64 {
    5
}
fn default_cert_validity_days() -> u32 {
    10
}

/// Values given on the command line. `None` keeps the file's value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub http_port: Option<u16>,
    pub bind: Option<String>,
    pub cert: Option<String>,
    pub key: Option<String>,
}

/// Resolved server configuration (all paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub bind: IpAddr,
    pub port: u16,
    pub http_port: u16,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub path: String,
    pub write_interval: Duration,
    pub shutdown_grace: Duration,
    pub cert_validity_days: u32,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, overrides: Overrides) -> WtResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| WtError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Self::resolve(file_config.server, overrides)
    }

    fn resolve(section: ServerSection, overrides: Overrides) -> WtResult<Self> {
        let bind_str = overrides.bind.unwrap_or(section.bind);
        let bind: IpAddr = bind_str
            .parse()
            .map_err(|e| WtError::Config(format!("invalid bind address {bind_str:?}: {e}")))?;

        if !section.path.starts_with('/') {
            return Err(WtError::Config(format!(
                "session path must start with '/': {:?}",
                section.path
            )));
        }
        if section.write_interval_ms == 0 {
            return Err(WtError::Config("write_interval_ms must be positive".into()));
        }
        if section.cert_validity_days == 0 || section.cert_validity_days > 14 {
            return Err(WtError::Config(format!(
                "cert_validity_days must be between 1 and 14, got {}",
                section.cert_validity_days
            )));
        }

        let cert_str = overrides.cert.unwrap_or(section.cert);
        let key_str = overrides.key.unwrap_or(section.key);

        Ok(Self {
            host: section.host,
            bind,
            port: overrides.port.unwrap_or(section.port),
            http_port: overrides.http_port.unwrap_or(section.http_port),
            cert_path: expand_tilde_str(&cert_str),
            key_path: expand_tilde_str(&key_str),
            path: section.path,
            write_interval: Duration::from_millis(section.write_interval_ms),
            shutdown_grace: Duration::from_secs(section.shutdown_grace_secs),
            cert_validity_days: section.cert_validity_days,
        })
    }

    pub fn quic_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.http_port)
    }

    /// The URL clients should connect to.
    pub fn session_url(&self) -> String {
        format!("https://{}:{}{}", self.host, self.port, self.path)
    }
}

/// Expand `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
