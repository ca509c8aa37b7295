//! Server configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default listening port
pub const DEFAULT_PORT: u16 = 20443;

/// Longest a deferred request waits for a concurrency slot
pub const DEFAULT_MAX_DEFERRAL_WAIT: Duration = Duration::from_secs(30);

/// Delay before the probe endpoint answers
pub const DEFAULT_PROBE_DELAY: Duration = Duration::from_secs(1);

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Deferred requests still waiting after this long get a 503
    pub max_deferral_wait: Duration,
    pub probe_delay: Duration,
    /// Serve `/stats`. Off by default since it lists channel and collection names.
    pub expose_stats: bool,
    pub storage: StorageConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_deferral_wait: DEFAULT_MAX_DEFERRAL_WAIT,
            probe_delay: DEFAULT_PROBE_DELAY,
            expose_stats: false,
            storage: StorageConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_max_deferral_wait(mut self, wait: Duration) -> Self {
        self.max_deferral_wait = wait;
        self
    }

    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    pub fn with_stats(mut self, expose: bool) -> Self {
        self.expose_stats = expose;
        self
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage; contents are lost on restart
    #[default]
    Memory,
}
