//! Tasker configuration management

use crate::error::{Error, Result};
use crate::segment::{FileOptions, DEFAULT_MAX_BYTES};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main Tasker configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskerConfig {
    /// Adapter identity and request behavior
    #[serde(default)]
    pub adapter: AdapterConfig,

    /// File materialization
    #[serde(default)]
    pub files: FileConfig,

    /// WebSocket gateway
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl TaskerConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid config {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the adapter cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.adapter.request_timeout_ms == 0 {
            return Err(Error::Config("adapter.request_timeout_ms must be > 0".to_string()));
        }
        if self.adapter.path().is_empty() {
            return Err(Error::Config("adapter.path must not be empty".to_string()));
        }
        for upstream in &self.gateway.upstream {
            if !upstream.url.starts_with("ws://") && !upstream.url.starts_with("wss://") {
                return Err(Error::Config(format!(
                    "gateway.upstream url must be ws:// or wss://: {}",
                    upstream.url
                )));
            }
        }
        if self.files.max_bytes == 0 {
            return Err(Error::Config("files.max_bytes must be > 0".to_string()));
        }
        Ok(())
    }
}

/// What `destroy()` does with requests still in flight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestroyPolicy {
    /// Forget them; callers fail at their own timeout
    #[default]
    Drain,
    /// Fail them immediately
    Reject,
}

/// Adapter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Adapter id, used as the log source
    pub id: String,

    /// Display name
    pub name: String,

    /// Handler-table key; defaults to the name
    pub path: Option<String>,

    /// Timeout for correlated requests in milliseconds
    pub request_timeout_ms: u64,

    /// Behavior for in-flight requests on destroy
    pub destroy_policy: DestroyPolicy,
}

impl AdapterConfig {
    /// Effective handler-table path
    pub fn path(&self) -> &str {
        self.path.as_deref().unwrap_or(&self.name)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            id: "TASKER".to_string(),
            name: "Tasker".to_string(),
            path: None,
            request_timeout_ms: 60_000,
            destroy_policy: DestroyPolicy::Drain,
        }
    }
}

/// File materialization configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Allow downloading http(s) URLs
    pub allow_network_fetch: bool,

    /// Maximum resolved file size in bytes
    pub max_bytes: u64,

    /// Download timeout in seconds
    pub fetch_timeout_secs: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            allow_network_fetch: true,
            max_bytes: DEFAULT_MAX_BYTES,
            fetch_timeout_secs: 30,
        }
    }
}

impl From<&FileConfig> for FileOptions {
    fn from(config: &FileConfig) -> Self {
        FileOptions {
            allow_network_fetch: config.allow_network_fetch,
            max_bytes: config.max_bytes,
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
        }
    }
}

/// Gateway configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Forward WebSocket endpoints to dial
    pub upstream: Vec<UpstreamConfig>,
}

/// A forward connection the gateway dials out to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// `ws://` or `wss://` URL
    pub url: String,

    /// Handler-table key frames are dispatched to
    pub path: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 18791,
            upstream: Vec::new(),
        }
    }
}
