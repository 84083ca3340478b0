//! Traits for the broker client collaborator.

use std::time::Duration;

use super::config::{ClientConfig, CommitMode};
use super::record::{ErrorCode, ProducerRecord, Record, TopicPartition};
use crate::error::BusResult;

/// Factory for producer and consumer handles.
///
/// Configuration errors surface here, when a handle is built.
pub trait BrokerClient {
    type Producer: Producer;
    type Consumer: Consumer;

    fn create_producer(&self, config: &ClientConfig) -> BusResult<Self::Producer>;

    fn create_consumer(&self, config: &ClientConfig) -> BusResult<Self::Consumer>;
}

/// Producer handle with an outbound queue.
///
/// `publish` only enqueues; records leave the queue and delivery callbacks
/// fire while `poll` runs. Client-level errors go to the configured error
/// callback from `poll` as well.
pub trait Producer {
    fn publish(&mut self, record: ProducerRecord) -> BusResult<()>;

    /// Serve queued deliveries, waiting at most `timeout`.
    ///
    /// Returns the number of delivery reports served.
    fn poll(&mut self, timeout: Duration) -> BusResult<usize>;

    fn out_queue_len(&self) -> usize;
}

/// Consumer handle.
///
/// Object safe so rebalance callbacks and commit providers can work with any
/// client through `&mut dyn Consumer`.
pub trait Consumer {
    /// Subscribe to exact topics and `^` patterns, replacing any previous set.
    fn subscribe(&mut self, topics: &[String]) -> BusResult<()>;

    /// Assign partitions directly; `None` releases the current assignment.
    fn assign(&mut self, partitions: Option<Vec<TopicPartition>>) -> BusResult<()>;

    fn assignment(&self) -> Vec<TopicPartition>;

    /// Pull the next record or event, waiting at most `timeout`.
    ///
    /// Rebalance and client error callbacks fire from within this call.
    fn poll(&mut self, timeout: Duration) -> BusResult<Record>;

    /// Commit the current position of every assigned partition.
    fn commit(&mut self, mode: CommitMode) -> BusResult<()>;

    fn unsubscribe(&mut self) -> BusResult<()>;

    fn close(&mut self) -> BusResult<()>;
}

/// A partition change delivered to the rebalance callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RebalanceEvent {
    Assign(Vec<TopicPartition>),
    Revoke(Vec<TopicPartition>),
    Error(ErrorCode),
}

impl RebalanceEvent {
    pub fn code(&self) -> ErrorCode {
        match self {
            RebalanceEvent::Assign(_) => ErrorCode::AssignPartitions,
            RebalanceEvent::Revoke(_) => ErrorCode::RevokePartitions,
            RebalanceEvent::Error(code) => *code,
        }
    }
}
