//! Channel and collection configuration
//!
//! The configuration file is the only source of channel topology. It is read
//! once at startup and is immutable afterwards.
//!
//! ```json
//! {
//!   "channels": [
//!     {
//!       "name": "lab",
//!       "password": "secret",
//!       "collections": [
//!         { "name": "default", "maxGetsPerMinute": 600, "maxSetsPerMinute": 60 }
//!       ]
//!     }
//!   ]
//! }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default ceiling on simultaneously in-flight operations per collection
pub const DEFAULT_MAX_CONCURRENT: u32 = 3;

/// File name looked up inside the data directory
pub const CONFIG_FILE_NAME: &str = "pairio.json";

/// Top-level configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PairioConfig {
    /// Channel list. Kept optional so that an absent field can be reported
    /// precisely instead of as a generic parse failure.
    #[serde(default)]
    pub channels: Option<Vec<ChannelConfig>>,
}

impl PairioConfig {
    pub fn new(channels: Vec<ChannelConfig>) -> Self {
        Self {
            channels: Some(channels),
        }
    }

    /// Parse a configuration document from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration document from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|source| Error::ConfigParse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load `pairio.json` from a data directory
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(Error::InvalidConfig(format!(
                "Not a directory: {}",
                dir.display()
            )));
        }
        Self::load(dir.join(CONFIG_FILE_NAME))
    }

    /// Channel list, failing if the field was omitted
    pub fn channels(&self) -> Result<&[ChannelConfig]> {
        self.channels
            .as_deref()
            .ok_or(Error::MissingField("channels"))
    }
}

/// Configuration of a single channel (tenant)
#[derive(Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    pub password: String,
    pub collections: Vec<CollectionConfig>,
}

impl ChannelConfig {
    pub fn new(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
            collections: Vec::new(),
        }
    }

    pub fn with_collection(mut self, collection: CollectionConfig) -> Self {
        self.collections.push(collection);
        self
    }
}

impl std::fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("name", &self.name)
            .field("password", &"[REDACTED]")
            .field("collections", &self.collections)
            .finish()
    }
}

/// Quota configuration of a collection within a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionConfig {
    pub name: String,

    #[serde(alias = "maxNumGetsPerMinute")]
    pub max_gets_per_minute: u64,

    #[serde(alias = "maxNumSetsPerMinute")]
    pub max_sets_per_minute: u64,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
}

fn default_max_concurrent() -> u32 {
    DEFAULT_MAX_CONCURRENT
}

impl CollectionConfig {
    pub fn new(name: impl Into<String>, max_gets_per_minute: u64, max_sets_per_minute: u64) -> Self {
        Self {
            name: name.into(),
            max_gets_per_minute,
            max_sets_per_minute,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: u32) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }
}
