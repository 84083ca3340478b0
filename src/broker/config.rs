//! Broker client configuration.
//!
//! A `ClientConfig` is owned by exactly one dispatcher or processor. The
//! delivery, rebalance and error callbacks live here as closures over that
//! owner's state, so two instances never share mutable broker configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::client::{Consumer, RebalanceEvent};
use super::record::{ErrorCode, Record};
use crate::error::{BusError, BusResult};

/// Well-known configuration keys.
pub const BOOTSTRAP_SERVERS: &str = "bootstrap.servers";
pub const GROUP_ID: &str = "group.id";
pub const AUTO_OFFSET_RESET: &str = "auto.offset.reset";
pub const ENABLE_AUTO_COMMIT: &str = "enable.auto.commit";
pub const ENABLE_PARTITION_EOF: &str = "enable.partition.eof";
pub const QUEUE_BUFFERING_MAX_MESSAGES: &str = "queue.buffering.max.messages";

/// Invoked once per delivery report. An `Err` aborts the surrounding poll.
pub type DeliveryCallback = Arc<dyn Fn(&Record) -> BusResult<()> + Send + Sync>;

/// Invoked synchronously from within a consumer poll on partition changes.
pub type RebalanceCallback =
    Arc<dyn Fn(&mut dyn Consumer, RebalanceEvent) -> BusResult<()> + Send + Sync>;

/// Invoked from producer and consumer polls for client-level errors that
/// belong to no record. An `Err` aborts the surrounding poll.
pub type ErrorCallback = Arc<dyn Fn(ErrorCode, &str) -> BusResult<()> + Send + Sync>;

/// Key/value broker settings plus the callback hooks.
#[derive(Clone, Default)]
pub struct ClientConfig {
    settings: BTreeMap<String, String>,
    delivery_callback: Option<DeliveryCallback>,
    rebalance_callback: Option<RebalanceCallback>,
    error_callback: Option<ErrorCallback>,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// A configuration pointing at the given bootstrap servers.
    pub fn for_servers(servers: impl Into<String>) -> Self {
        let mut config = Self::new();
        config.set(BOOTSTRAP_SERVERS, servers);
        config
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(|s| s.as_str())
    }

    /// Read a boolean setting; absent means `default`.
    pub fn get_bool(&self, key: &str, default: bool) -> BusResult<bool> {
        match self.get(key) {
            None => Ok(default),
            Some("true") => Ok(true),
            Some("false") => Ok(false),
            Some(other) => Err(BusError::Configuration(format!(
                "invalid value for {}: {} (expected true or false)",
                key, other
            ))),
        }
    }

    /// Iterate over settings in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.settings.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn set_delivery_callback(&mut self, callback: DeliveryCallback) -> &mut Self {
        self.delivery_callback = Some(callback);
        self
    }

    pub fn set_rebalance_callback(&mut self, callback: RebalanceCallback) -> &mut Self {
        self.rebalance_callback = Some(callback);
        self
    }

    pub fn set_error_callback(&mut self, callback: ErrorCallback) -> &mut Self {
        self.error_callback = Some(callback);
        self
    }

    pub fn delivery_callback(&self) -> Option<&DeliveryCallback> {
        self.delivery_callback.as_ref()
    }

    pub fn rebalance_callback(&self) -> Option<&RebalanceCallback> {
        self.rebalance_callback.as_ref()
    }

    /// The configured error callback, or one that fails with
    /// `BusError::Client` when none was set.
    pub fn error_callback(&self) -> ErrorCallback {
        match &self.error_callback {
            Some(callback) => Arc::clone(callback),
            None => Arc::new(|code: ErrorCode, reason: &str| -> BusResult<()> {
                Err(BusError::client(code, reason))
            }),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("settings", &self.settings)
            .field("delivery_callback", &self.delivery_callback.is_some())
            .field("rebalance_callback", &self.rebalance_callback.is_some())
            .field("error_callback", &self.error_callback.is_some())
            .finish()
    }
}

/// Where a consumer group starts when it has no committed offset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OffsetReset {
    Earliest,
    #[default]
    Latest,
    /// Surface an error instead of picking a position.
    Error,
}

impl OffsetReset {
    /// Numeric constant for "beginning of partition".
    pub const OFFSET_BEGINNING: i64 = -2;
    /// Numeric constant for "end of partition".
    pub const OFFSET_END: i64 = -1;

    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
            OffsetReset::Error => "error",
        }
    }
}

impl FromStr for OffsetReset {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earliest" | "smallest" | "beginning" => Ok(OffsetReset::Earliest),
            "latest" | "largest" | "end" => Ok(OffsetReset::Latest),
            "error" => Ok(OffsetReset::Error),
            other => Err(BusError::Configuration(format!(
                "invalid value for {}: {}",
                AUTO_OFFSET_RESET, other
            ))),
        }
    }
}

impl TryFrom<String> for OffsetReset {
    type Error = BusError;

    fn try_from(value: String) -> Result<Self, BusError> {
        value.parse()
    }
}

impl From<OffsetReset> for String {
    fn from(reset: OffsetReset) -> Self {
        reset.as_str().to_string()
    }
}

impl TryFrom<i64> for OffsetReset {
    type Error = BusError;

    fn try_from(value: i64) -> Result<Self, BusError> {
        match value {
            OffsetReset::OFFSET_BEGINNING => Ok(OffsetReset::Earliest),
            OffsetReset::OFFSET_END => Ok(OffsetReset::Latest),
            other => Err(BusError::Configuration(format!(
                "invalid offset constant for {}: {}",
                AUTO_OFFSET_RESET, other
            ))),
        }
    }
}

impl fmt::Display for OffsetReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a consumer commit call waits for the broker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CommitMode {
    #[default]
    Sync,
    Async,
}
