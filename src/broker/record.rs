//! Records, error codes and addressing types exchanged with a broker client.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Header set carried by a record.
pub type Headers = BTreeMap<String, String>;

/// Header names used to round-trip message identity.
pub const MESSAGE_ID_HEADER: &str = "message_id";
pub const CORRELATION_ID_HEADER: &str = "correlation_id";
pub const CAUSATION_ID_HEADER: &str = "causation_id";

/// Broker error codes, numerically compatible with librdkafka.
///
/// Negative codes are local to the client, positive codes come from the
/// broker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    #[default]
    NoError,
    /// No record arrived within the poll timeout.
    TimedOut,
    /// The consumer reached the end of a partition.
    PartitionEof,
    /// A produced record was not acknowledged in time.
    MessageTimedOut,
    /// The outbound queue is full.
    QueueFull,
    AssignPartitions,
    RevokePartitions,
    /// No committed offset and the reset policy is `error`.
    AutoOffsetReset,
    /// Every broker connection of the client is down.
    AllBrokersDown,
    UnknownTopicOrPartition,
    Other(i32),
}

impl ErrorCode {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ErrorCode::NoError,
            -185 => ErrorCode::TimedOut,
            -191 => ErrorCode::PartitionEof,
            -192 => ErrorCode::MessageTimedOut,
            -184 => ErrorCode::QueueFull,
            -175 => ErrorCode::AssignPartitions,
            -174 => ErrorCode::RevokePartitions,
            -140 => ErrorCode::AutoOffsetReset,
            -187 => ErrorCode::AllBrokersDown,
            3 => ErrorCode::UnknownTopicOrPartition,
            other => ErrorCode::Other(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            ErrorCode::NoError => 0,
            ErrorCode::TimedOut => -185,
            ErrorCode::PartitionEof => -191,
            ErrorCode::MessageTimedOut => -192,
            ErrorCode::QueueFull => -184,
            ErrorCode::AssignPartitions => -175,
            ErrorCode::RevokePartitions => -174,
            ErrorCode::AutoOffsetReset => -140,
            ErrorCode::AllBrokersDown => -187,
            ErrorCode::UnknownTopicOrPartition => 3,
            ErrorCode::Other(code) => *code,
        }
    }

    /// Human readable description of the code.
    pub fn description(&self) -> String {
        match self {
            ErrorCode::NoError => "Success".into(),
            ErrorCode::TimedOut => "Local: Timed out".into(),
            ErrorCode::PartitionEof => "Broker: No more messages".into(),
            ErrorCode::MessageTimedOut => "Local: Message timed out".into(),
            ErrorCode::QueueFull => "Local: Queue full".into(),
            ErrorCode::AssignPartitions => "Local: Assign partitions".into(),
            ErrorCode::RevokePartitions => "Local: Revoke partitions".into(),
            ErrorCode::AutoOffsetReset => "Local: No offset to automatically reset to".into(),
            ErrorCode::AllBrokersDown => "Local: All broker connections are down".into(),
            ErrorCode::UnknownTopicOrPartition => "Broker: Unknown topic or partition".into(),
            ErrorCode::Other(code) => format!("Err-{}?", code),
        }
    }

    pub fn is_error(&self) -> bool {
        *self != ErrorCode::NoError
    }

    /// Timeouts and end-of-partition are expected pauses, not failures.
    pub fn is_benign(&self) -> bool {
        matches!(self, ErrorCode::TimedOut | ErrorCode::PartitionEof)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.description(), self.code())
    }
}

/// Target partition for a produced record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    /// Let the partitioner choose.
    #[default]
    Unassigned,
    Id(i32),
}

impl Partition {
    pub fn code(&self) -> i32 {
        match self {
            Partition::Unassigned => -1,
            Partition::Id(id) => *id,
        }
    }
}

impl From<i32> for Partition {
    fn from(id: i32) -> Self {
        if id < 0 {
            Partition::Unassigned
        } else {
            Partition::Id(id)
        }
    }
}

/// Publish flags for a produced record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublishFlags(u32);

impl PublishFlags {
    pub const NONE: PublishFlags = PublishFlags(0);
    /// The client takes ownership of the payload.
    pub const FREE: PublishFlags = PublishFlags(0x1);
    /// The client copies the payload.
    pub const COPY: PublishFlags = PublishFlags(0x2);
    /// Block `publish` while the outbound queue is full.
    pub const BLOCK: PublishFlags = PublishFlags(0x4);

    pub const fn from_bits(bits: u32) -> Self {
        PublishFlags(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: PublishFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for PublishFlags {
    fn default() -> Self {
        PublishFlags::BLOCK
    }
}

impl std::ops::BitOr for PublishFlags {
    type Output = PublishFlags;

    fn bitor(self, rhs: PublishFlags) -> PublishFlags {
        PublishFlags(self.0 | rhs.0)
    }
}

/// A concrete partition of a topic.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition)
    }
}

/// A record handed to a producer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProducerRecord {
    pub topic: String,
    pub partition: Partition,
    pub flags: PublishFlags,
    pub key: Option<String>,
    pub payload: Option<Vec<u8>>,
    pub headers: Headers,
    /// Milliseconds since the Unix epoch; `None` lets the client stamp it.
    pub timestamp: Option<i64>,
    /// Caller tag echoed back in the delivery report.
    pub opaque: Option<String>,
}

impl ProducerRecord {
    pub fn to(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            partition: Partition::default(),
            flags: PublishFlags::default(),
            key: None,
            payload: None,
            headers: Headers::new(),
            timestamp: None,
            opaque: None,
        }
    }

    pub fn partition(mut self, partition: Partition) -> Self {
        self.partition = partition;
        self
    }

    pub fn flags(mut self, flags: PublishFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn payload(mut self, payload: Option<Vec<u8>>) -> Self {
        self.payload = payload;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn opaque(mut self, opaque: impl Into<String>) -> Self {
        self.opaque = Some(opaque.into());
        self
    }
}

/// A record returned by a consumer poll, or a delivery report.
///
/// When `error` is set the record is an event rather than data: a poll
/// timeout, an end-of-partition marker, or a failure.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Option<Vec<u8>>,
    pub headers: Headers,
    pub timestamp: Option<i64>,
    pub opaque: Option<String>,
    pub error: ErrorCode,
}

impl Record {
    /// An error event not tied to a particular record.
    pub fn error_event(error: ErrorCode) -> Self {
        Self {
            partition: -1,
            offset: -1,
            error,
            ..Self::default()
        }
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(|s| s.as_str())
    }

    pub fn is_error(&self) -> bool {
        self.error.is_error()
    }

    /// Get the payload as a string (if present and valid UTF-8).
    pub fn payload_str(&self) -> Option<&str> {
        self.payload
            .as_deref()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }
}
