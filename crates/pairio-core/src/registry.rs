//! Channel registry
//!
//! Built once from [`PairioConfig`] and read-only afterwards. Channels are
//! looked up by name; collections by name within their channel.

use crate::admission::{CollectionSnapshot, CollectionState};
use crate::config::{ChannelConfig, PairioConfig};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// A tenant: password plus its collections, in configuration order
pub struct Channel {
    name: String,
    password: String,
    collections: Vec<Arc<CollectionState>>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("password", &"[REDACTED]")
            .field("collections", &self.collections)
            .finish()
    }
}

impl Channel {
    fn from_config(config: &ChannelConfig, now: DateTime<Utc>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut collections = Vec::with_capacity(config.collections.len());
        for cc in &config.collections {
            if !seen.insert(cc.name.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "Duplicate collection {} in channel {}",
                    cc.name, config.name
                )));
            }
            if cc.max_concurrent == 0 {
                return Err(Error::InvalidConfig(format!(
                    "maxConcurrent must be at least 1 for collection {} in channel {}",
                    cc.name, config.name
                )));
            }
            collections.push(Arc::new(CollectionState::new(cc, now)));
        }
        Ok(Self {
            name: config.name.clone(),
            password: config.password.clone(),
            collections,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn find_collection(&self, name: &str) -> Option<&Arc<CollectionState>> {
        self.collections.iter().find(|cc| cc.name() == name)
    }

    pub fn collections(&self) -> &[Arc<CollectionState>] {
        &self.collections
    }
}

/// Counters of every collection in a channel
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChannelSnapshot {
    pub name: String,
    pub collections: Vec<CollectionSnapshot>,
}

/// Lookup table from channel name to channel
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: HashMap<String, Channel>,
}

impl ChannelRegistry {
    /// Build the registry, starting every collection's window now
    pub fn from_config(config: &PairioConfig) -> Result<Self> {
        Self::from_config_at(config, Utc::now())
    }

    /// Build the registry with an explicit start time for the first window
    pub fn from_config_at(config: &PairioConfig, now: DateTime<Utc>) -> Result<Self> {
        let channel_configs = config.channels()?;
        if channel_configs.is_empty() {
            warn!("No channels provided in config file");
        }

        let mut channels = HashMap::with_capacity(channel_configs.len());
        for ch in channel_configs {
            if channels.contains_key(&ch.name) {
                return Err(Error::InvalidConfig(format!(
                    "Duplicate channel: {}",
                    ch.name
                )));
            }
            let channel = Channel::from_config(ch, now)?;
            info!(
                "Loaded channel {} with {} collection(s)",
                ch.name,
                channel.collections.len()
            );
            channels.insert(ch.name.clone(), channel);
        }

        Ok(Self { channels })
    }

    pub fn resolve(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn snapshot(&self) -> Vec<ChannelSnapshot> {
        let mut snapshots: Vec<_> = self
            .channels
            .values()
            .map(|ch| ChannelSnapshot {
                name: ch.name.clone(),
                collections: ch.collections.iter().map(|cc| cc.snapshot()).collect(),
            })
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectionConfig;

    fn config() -> PairioConfig {
        PairioConfig::new(vec![
            ChannelConfig::new("lab", "pw")
                .with_collection(CollectionConfig::new("default", 10, 10))
                .with_collection(CollectionConfig::new("results", 5, 1)),
            ChannelConfig::new("public", "open")
                .with_collection(CollectionConfig::new("default", 100, 0)),
        ])
    }

    #[test]
    fn test_resolve_channels_and_collections() {
        let registry = ChannelRegistry::from_config(&config()).unwrap();
        assert_eq!(registry.len(), 2);

        let lab = registry.resolve("lab").unwrap();
        assert_eq!(lab.password(), "pw");
        assert_eq!(lab.collections().len(), 2);
        assert_eq!(lab.find_collection("results").unwrap().limit(
            crate::admission::OperationKind::Write
        ), 1);
        assert!(lab.find_collection("missing").is_none());
        assert_eq!(lab.find_collection("default").unwrap().max_concurrent(), 3);

        assert!(registry.resolve("nope").is_none());
    }

    #[test]
    fn test_collections_are_per_channel() {
        let registry = ChannelRegistry::from_config(&config()).unwrap();
        let a = registry.resolve("lab").unwrap().find_collection("default").unwrap();
        let b = registry.resolve("public").unwrap().find_collection("default").unwrap();
        assert!(!Arc::ptr_eq(a, b));
    }

    #[test]
    fn test_missing_channels_is_fatal() {
        let err = ChannelRegistry::from_config(&PairioConfig::default()).unwrap_err();
        assert!(matches!(err, Error::MissingField("channels")));
    }

    #[test]
    fn test_empty_channels_is_allowed() {
        let registry = ChannelRegistry::from_config(&PairioConfig::new(Vec::new())).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_channel_rejected() {
        let config = PairioConfig::new(vec![
            ChannelConfig::new("lab", "a"),
            ChannelConfig::new("lab", "b"),
        ]);
        assert!(matches!(
            ChannelRegistry::from_config(&config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_duplicate_collection_rejected() {
        let config = PairioConfig::new(vec![ChannelConfig::new("lab", "a")
            .with_collection(CollectionConfig::new("c", 1, 1))
            .with_collection(CollectionConfig::new("c", 2, 2))]);
        assert!(matches!(
            ChannelRegistry::from_config(&config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = PairioConfig::new(vec![ChannelConfig::new("lab", "a")
            .with_collection(CollectionConfig::new("c", 1, 1).with_max_concurrent(0))]);
        assert!(matches!(
            ChannelRegistry::from_config(&config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_snapshot_sorted_by_name() {
        let registry = ChannelRegistry::from_config(&config()).unwrap();
        let snapshot = registry.snapshot();
        let names: Vec<_> = snapshot.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["lab", "public"]);
        assert_eq!(snapshot[0].collections.len(), 2);
    }
}
