//! The domain message carried over the bus.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

/// An immutable domain message with identity, causation and correlation.
///
/// `name` is the logical topic; it is normalized into a broker topic when the
/// message is dispatched. `content` is opaque to the bus.
///
/// ## Example
///
/// ```
/// use kafka_message_bus::Message;
///
/// let created = Message::new("Orders\\Created", Some(br#"{"id":"o1"}"#.to_vec()));
/// let shipped = Message::caused_by(&created, "Orders\\Shipped", None);
///
/// assert_eq!(shipped.correlation_id(), created.correlation_id());
/// assert_eq!(shipped.causation_id(), created.message_id());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    message_id: String,
    correlation_id: String,
    causation_id: String,
    name: String,
    #[serde(with = "content_serde")]
    content: Option<Vec<u8>>,
    /// Milliseconds since the Unix epoch.
    timestamp: i64,
}

mod content_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(content: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        content
            .as_ref()
            .map(|bytes| STANDARD.encode(bytes))
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

impl Message {
    /// Create a message that starts a new correlation chain.
    pub fn new(name: impl Into<String>, content: Option<Vec<u8>>) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            correlation_id: id.clone(),
            causation_id: id.clone(),
            message_id: id,
            name: name.into(),
            content,
            timestamp: now_millis(),
        }
    }

    /// Create a message caused by `parent`, continuing its correlation chain.
    pub fn caused_by(parent: &Message, name: impl Into<String>, content: Option<Vec<u8>>) -> Self {
        Self {
            correlation_id: parent.correlation_id.clone(),
            causation_id: parent.message_id.clone(),
            ..Self::new(name, content)
        }
    }

    /// Rebuild a message from all of its parts.
    pub fn from_parts(
        message_id: impl Into<String>,
        correlation_id: impl Into<String>,
        causation_id: impl Into<String>,
        name: impl Into<String>,
        content: Option<Vec<u8>>,
        timestamp: i64,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            correlation_id: correlation_id.into(),
            causation_id: causation_id.into(),
            name: name.into(),
            content,
            timestamp,
        }
    }

    /// Create a message with a bitcode-serialized payload.
    pub fn encode<T: Serialize>(name: impl Into<String>, payload: &T) -> Result<Self, bitcode::Error> {
        let bytes = bitcode::serialize(payload)?;
        Ok(Self::new(name, Some(bytes)))
    }

    /// Decode the content from bitcode binary format.
    ///
    /// A message without content decodes as an empty buffer.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, bitcode::Error> {
        bitcode::deserialize(self.content.as_deref().unwrap_or_default())
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_causation_id(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = causation_id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    // Getters
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn causation_id(&self) -> &str {
        &self.causation_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Get the content as a string (if present and valid UTF-8).
    pub fn content_str(&self) -> Option<&str> {
        self.content().and_then(|bytes| std::str::from_utf8(bytes).ok())
    }
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(millis)
        .unwrap_or_default()
}

/// Whole milliseconds in `elapsed`, saturating at `i64::MAX`.
fn millis(elapsed: Duration) -> i64 {
    i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
}
