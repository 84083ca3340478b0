//! Error types for dispatch and consume operations.

use std::error::Error;

use crate::broker::ErrorCode;

/// Error returned by message handlers.
///
/// Boxed so handlers can use `?` on whatever error type their domain produces.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Result type for bus operations.
pub type BusResult<T> = std::result::Result<T, BusError>;

/// Errors raised by the dispatcher, the processor and broker clients.
///
/// Every variant except `Handler` originates in this crate or in the broker
/// client; none of them is retried internally.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Invalid settings rejected while building a producer or consumer.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The broker client refused to enqueue a record.
    #[error("publish failed: {reason} ({code})")]
    Publish { code: ErrorCode, reason: String },

    /// A delivery report carried an error code.
    #[error("Kafka.Producer error: {reason}")]
    Delivery { code: ErrorCode, reason: String },

    /// A consumed record carried a non-benign error code.
    #[error("Kafka.Consumer error: {reason} ({code})")]
    Consume { code: ErrorCode, reason: String },

    /// A client-level error served outside any record, e.g. every broker
    /// connection being down.
    #[error("Kafka.Conf error: {description} (reason: {reason})")]
    Client {
        code: ErrorCode,
        description: String,
        reason: String,
    },

    /// A rebalance event other than assign/revoke.
    #[error("rebalance failed: {0}")]
    Rebalance(ErrorCode),

    /// A handler failed while processing a message.
    #[error("handler failed for topic {topic}: {source}")]
    Handler {
        topic: String,
        #[source]
        source: HandlerError,
    },

    /// A topic pattern did not compile.
    #[error("invalid topic pattern {pattern}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// No built-in provider is registered under this name.
    #[error("unknown {kind} provider: {name}")]
    UnknownProvider { kind: &'static str, name: String },

    /// The consumer handle was used after `close()`.
    #[error("consumer is closed")]
    Closed,

    /// Shared in-process state was poisoned by a panicking thread.
    #[error("lock poisoned during {0}")]
    LockPoisoned(&'static str),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BusError {
    /// Delivery failure for a report carrying `code`.
    pub fn delivery(code: ErrorCode) -> Self {
        BusError::Delivery {
            code,
            reason: code.description(),
        }
    }

    /// Consume failure for a record carrying `code`.
    pub fn consume(code: ErrorCode) -> Self {
        BusError::Consume {
            code,
            reason: code.description(),
        }
    }

    /// Client-level failure for `code` with the client's own reason text.
    pub fn client(code: ErrorCode, reason: impl Into<String>) -> Self {
        BusError::Client {
            code,
            description: code.description(),
            reason: reason.into(),
        }
    }

    /// The broker error code behind this error, if any.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            BusError::Publish { code, .. }
            | BusError::Delivery { code, .. }
            | BusError::Consume { code, .. }
            | BusError::Client { code, .. } => Some(*code),
            BusError::Rebalance(code) => Some(*code),
            _ => None,
        }
    }
}
