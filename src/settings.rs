//! Serializable settings for dispatchers and processors.
//!
//! Every field has a default, so a settings document only needs the values
//! that differ:
//!
//! ```
//! use kafka_message_bus::settings::ProcessorSettings;
//!
//! let settings = ProcessorSettings::from_json(r#"{
//!     "bootstrap_servers": "kafka-1:9092,kafka-2:9092",
//!     "group_id": "Billing Service",
//!     "auto_commit": false,
//!     "commit_provider": "sync"
//! }"#).unwrap();
//!
//! assert_eq!(settings.timeout_ms, 30_000);
//! assert_eq!(settings.commit_provider.as_deref(), Some("sync"));
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::broker::{ClientConfig, OffsetReset, Partition, PublishFlags, TopicPartition};
use crate::error::BusResult;

pub const DEFAULT_BOOTSTRAP_SERVERS: &str = "localhost:9092";

/// Settings for a [`MessageDispatcher`](crate::MessageDispatcher).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    pub bootstrap_servers: String,
    pub partition: Partition,
    pub publish_flags: PublishFlags,
    /// Timeout of each producer poll while waiting for delivery.
    pub poll_timeout_ms: u64,
    /// Name of a built-in payload provider.
    pub payload_provider: Option<String>,
    /// Extra broker client properties.
    pub properties: BTreeMap<String, String>,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            bootstrap_servers: DEFAULT_BOOTSTRAP_SERVERS.to_string(),
            partition: Partition::Unassigned,
            publish_flags: PublishFlags::default(),
            poll_timeout_ms: 10_000,
            payload_provider: None,
            properties: BTreeMap::new(),
        }
    }
}

impl DispatcherSettings {
    pub fn from_json(json: &str) -> BusResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Broker client configuration derived from these settings.
    pub fn client_config(&self) -> ClientConfig {
        client_config(&self.bootstrap_servers, &self.properties)
    }
}

/// Settings for a [`MessageProcessor`](crate::MessageProcessor).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorSettings {
    pub bootstrap_servers: String,
    /// Consumer group; normalized like a topic name.
    pub group_id: String,
    pub auto_offset_reset: OffsetReset,
    pub auto_commit: bool,
    /// Timeout of each consumer poll.
    pub timeout_ms: u64,
    /// Explicit assignment bypassing the group's automatic assignment.
    pub partitions: Option<Vec<TopicPartition>>,
    pub message_provider: Option<String>,
    pub commit_provider: Option<String>,
    pub error_provider: Option<String>,
    pub properties: BTreeMap<String, String>,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            bootstrap_servers: DEFAULT_BOOTSTRAP_SERVERS.to_string(),
            group_id: "default".to_string(),
            auto_offset_reset: OffsetReset::default(),
            auto_commit: true,
            timeout_ms: 30_000,
            partitions: None,
            message_provider: None,
            commit_provider: None,
            error_provider: None,
            properties: BTreeMap::new(),
        }
    }
}

impl ProcessorSettings {
    pub fn from_json(json: &str) -> BusResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Broker client configuration derived from these settings.
    ///
    /// Group, offset-reset and auto-commit are applied by the processor.
    pub fn client_config(&self) -> ClientConfig {
        client_config(&self.bootstrap_servers, &self.properties)
    }
}

fn client_config(servers: &str, properties: &BTreeMap<String, String>) -> ClientConfig {
    let mut config = ClientConfig::for_servers(servers);
    for (key, value) in properties {
        config.set(key.as_str(), value.as_str());
    }
    config
}
