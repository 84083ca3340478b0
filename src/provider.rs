//! Pluggable transforms used by the dispatcher and the processor.
//!
//! Each role has its own capability trait with a fixed input/output contract.
//! Closures implement the traits directly, and named built-ins can be
//! resolved from configuration strings:
//!
//! | Role | Trait | Built-ins |
//! |------|-------|-----------|
//! | outbound payload | [`PayloadProvider`] | `content`, `json` |
//! | inbound reconstruction | [`MessageProvider`] | `headers`, `json` |
//! | commit | [`CommitProvider`] | `sync`, `async` |
//! | consume errors | [`ErrorProvider`] | `benign`, `log`, `strict` |

use std::sync::Arc;

use tracing::warn;

use crate::broker::{
    CommitMode, Consumer, Record, CAUSATION_ID_HEADER, CORRELATION_ID_HEADER, MESSAGE_ID_HEADER,
};
use crate::error::{BusError, BusResult};
use crate::message::Message;

/// Turns an outbound message into the record payload.
pub trait PayloadProvider: Send + Sync {
    fn payload(&self, message: &Message) -> Option<Vec<u8>>;
}

impl<F> PayloadProvider for F
where
    F: Fn(&Message) -> Option<Vec<u8>> + Send + Sync,
{
    fn payload(&self, message: &Message) -> Option<Vec<u8>> {
        self(message)
    }
}

/// Rebuilds a domain message from a consumed record.
///
/// Returning `None` skips the record.
pub trait MessageProvider: Send + Sync {
    fn message(&self, record: &Record) -> Option<Message>;
}

impl<F> MessageProvider for F
where
    F: Fn(&Record) -> Option<Message> + Send + Sync,
{
    fn message(&self, record: &Record) -> Option<Message> {
        self(record)
    }
}

/// Decides when and what to commit when auto-commit is disabled.
pub trait CommitProvider: Send + Sync {
    fn commit(&self, consumer: &mut dyn Consumer) -> BusResult<()>;
}

impl<F> CommitProvider for F
where
    F: Fn(&mut dyn Consumer) -> BusResult<()> + Send + Sync,
{
    fn commit(&self, consumer: &mut dyn Consumer) -> BusResult<()> {
        self(consumer)
    }
}

/// Handles consumed records carrying an error code.
///
/// `Ok` keeps the consume loop running, `Err` terminates it.
pub trait ErrorProvider: Send + Sync {
    fn on_error(&self, record: &Record) -> BusResult<()>;
}

impl<F> ErrorProvider for F
where
    F: Fn(&Record) -> BusResult<()> + Send + Sync,
{
    fn on_error(&self, record: &Record) -> BusResult<()> {
        self(record)
    }
}

/// Rebuild a message from identity headers, topic, payload and timestamp.
///
/// Returns `None` for records without a `message_id` header. Missing
/// correlation or causation headers fall back to the message id.
pub fn message_from_headers(record: &Record) -> Option<Message> {
    let message_id = record.header(MESSAGE_ID_HEADER)?;
    Some(Message::from_parts(
        message_id,
        record.header(CORRELATION_ID_HEADER).unwrap_or(message_id),
        record.header(CAUSATION_ID_HEADER).unwrap_or(message_id),
        record.topic.clone(),
        record.payload.clone(),
        record.timestamp.unwrap_or_default(),
    ))
}

/// Publishes the message content as-is.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContentPayload;

impl PayloadProvider for ContentPayload {
    fn payload(&self, message: &Message) -> Option<Vec<u8>> {
        message.content().map(<[u8]>::to_vec)
    }
}

/// Reconstructs messages from identity headers.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeaderMessage;

impl MessageProvider for HeaderMessage {
    fn message(&self, record: &Record) -> Option<Message> {
        message_from_headers(record)
    }
}

/// Carries the whole message as a JSON envelope in the payload.
///
/// The inbound side keeps the name stored in the envelope, so consumers see
/// the original domain name rather than the normalized topic.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonEnvelope;

impl PayloadProvider for JsonEnvelope {
    fn payload(&self, message: &Message) -> Option<Vec<u8>> {
        serde_json::to_vec(message).ok()
    }
}

impl MessageProvider for JsonEnvelope {
    fn message(&self, record: &Record) -> Option<Message> {
        let payload = record.payload.as_deref()?;
        match serde_json::from_slice(payload) {
            Ok(message) => Some(message),
            Err(err) => {
                warn!(topic = %record.topic, offset = record.offset, error = %err, "invalid JSON envelope");
                None
            }
        }
    }
}

/// Commits the current position of every assigned partition.
#[derive(Clone, Copy, Debug, Default)]
pub struct CommitOffsets {
    pub mode: CommitMode,
}

impl CommitProvider for CommitOffsets {
    fn commit(&self, consumer: &mut dyn Consumer) -> BusResult<()> {
        consumer.commit(self.mode)
    }
}

/// Ignores timeouts and end-of-partition, fails on anything else.
#[derive(Clone, Copy, Debug, Default)]
pub struct BenignErrors;

impl ErrorProvider for BenignErrors {
    fn on_error(&self, record: &Record) -> BusResult<()> {
        if record.error.is_benign() {
            return Ok(());
        }
        Err(BusError::consume(record.error))
    }
}

/// Logs every error and keeps consuming.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogErrors;

impl ErrorProvider for LogErrors {
    fn on_error(&self, record: &Record) -> BusResult<()> {
        if !record.error.is_benign() {
            warn!(
                topic = %record.topic,
                partition = record.partition,
                error = %record.error,
                "consume error suppressed"
            );
        }
        Ok(())
    }
}

/// Treats every error as fatal, timeouts included.
#[derive(Clone, Copy, Debug, Default)]
pub struct StrictErrors;

impl ErrorProvider for StrictErrors {
    fn on_error(&self, record: &Record) -> BusResult<()> {
        Err(BusError::consume(record.error))
    }
}

fn unknown(kind: &'static str, name: &str) -> BusError {
    BusError::UnknownProvider {
        kind,
        name: name.to_string(),
    }
}

/// Resolve a built-in payload provider by name.
pub fn resolve_payload_provider(name: &str) -> BusResult<Arc<dyn PayloadProvider>> {
    match name {
        "content" => Ok(Arc::new(ContentPayload)),
        "json" => Ok(Arc::new(JsonEnvelope)),
        other => Err(unknown("payload", other)),
    }
}

/// Resolve a built-in message provider by name.
pub fn resolve_message_provider(name: &str) -> BusResult<Arc<dyn MessageProvider>> {
    match name {
        "headers" => Ok(Arc::new(HeaderMessage)),
        "json" => Ok(Arc::new(JsonEnvelope)),
        other => Err(unknown("message", other)),
    }
}

/// Resolve a built-in commit provider by name.
pub fn resolve_commit_provider(name: &str) -> BusResult<Arc<dyn CommitProvider>> {
    match name {
        "sync" => Ok(Arc::new(CommitOffsets {
            mode: CommitMode::Sync,
        })),
        "async" => Ok(Arc::new(CommitOffsets {
            mode: CommitMode::Async,
        })),
        other => Err(unknown("commit", other)),
    }
}

/// Resolve a built-in error provider by name.
pub fn resolve_error_provider(name: &str) -> BusResult<Arc<dyn ErrorProvider>> {
    match name {
        "benign" => Ok(Arc::new(BenignErrors)),
        "log" => Ok(Arc::new(LogErrors)),
        "strict" => Ok(Arc::new(StrictErrors)),
        other => Err(unknown("error", other)),
    }
}
