//! In-memory broker for testing and single-process scenarios.
//!
//! `InMemoryBroker` implements `BrokerClient` on top of a shared, append-only
//! log per topic partition. Producers and consumers created from it behave
//! like their networked counterparts where it matters to the bus:
//! - records are queued by `publish` and delivered by `poll`, firing the
//!   delivery callback per record
//! - consumers join a group, get partitions through the rebalance callback
//!   and resume from committed offsets
//! - faults (failed deliveries, consume errors, rebalance errors, client
//!   errors) can be injected from tests

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::client::{BrokerClient, Consumer, Producer, RebalanceEvent};
use super::config::{
    ClientConfig, CommitMode, DeliveryCallback, ErrorCallback, OffsetReset, RebalanceCallback,
    AUTO_OFFSET_RESET,
    BOOTSTRAP_SERVERS, ENABLE_AUTO_COMMIT, ENABLE_PARTITION_EOF, GROUP_ID,
    QUEUE_BUFFERING_MAX_MESSAGES,
};
use super::record::{ErrorCode, Partition, ProducerRecord, PublishFlags, Record, TopicPartition};
use crate::error::{BusError, BusResult};
use crate::message::now_millis;
use crate::topic::TopicKey;

const DEFAULT_MAX_QUEUE: usize = 100_000;

/// In-memory broker shared by every handle created from it.
///
/// ## Example
///
/// ```
/// use kafka_message_bus::broker::{InMemoryBroker, ProducerRecord};
///
/// let broker = InMemoryBroker::new();
/// broker.append(ProducerRecord::to("orders").payload(Some(b"{}".to_vec()))).unwrap();
///
/// assert_eq!(broker.records("orders").len(), 1);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

struct BrokerState {
    default_partitions: i32,
    topics: BTreeMap<String, Vec<Vec<Record>>>,
    /// Committed offsets per consumer group.
    committed: HashMap<(String, TopicPartition), i64>,
    delivery_failures: HashMap<String, ErrorCode>,
    consume_errors: VecDeque<ErrorCode>,
    rebalance_errors: VecDeque<ErrorCode>,
    /// Client-level errors with their reason, served by the next poll of any handle.
    client_errors: VecDeque<(ErrorCode, String)>,
    next_partition: i32,
    closed_consumers: usize,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            default_partitions: 1,
            topics: BTreeMap::new(),
            committed: HashMap::new(),
            delivery_failures: HashMap::new(),
            consume_errors: VecDeque::new(),
            rebalance_errors: VecDeque::new(),
            client_errors: VecDeque::new(),
            next_partition: 0,
            closed_consumers: 0,
        }
    }
}

impl BrokerState {
    fn ensure_topic(&mut self, topic: &str) -> i32 {
        let partitions = self.default_partitions;
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions as usize])
            .len() as i32
    }

    fn choose_partition(&mut self, key: Option<&str>, partitions: i32) -> i32 {
        match key {
            Some(key) => (fnv1a(key.as_bytes()) % partitions as u64) as i32,
            None => {
                let partition = self.next_partition.rem_euclid(partitions);
                self.next_partition = self.next_partition.wrapping_add(1);
                partition
            }
        }
    }

    /// Append a record and build its delivery report.
    fn append(&mut self, record: ProducerRecord) -> Record {
        let partitions = self.ensure_topic(&record.topic);
        let partition = match record.partition {
            Partition::Id(id) => id,
            Partition::Unassigned => self.choose_partition(record.key.as_deref(), partitions),
        };

        let mut report = Record {
            topic: record.topic,
            partition,
            offset: -1,
            key: record.key,
            payload: record.payload,
            headers: record.headers,
            timestamp: Some(record.timestamp.unwrap_or_else(now_millis)),
            opaque: record.opaque,
            error: ErrorCode::NoError,
        };

        match self
            .topics
            .get_mut(&report.topic)
            .and_then(|logs| logs.get_mut(partition as usize))
        {
            Some(log) if partition >= 0 => {
                report.offset = log.len() as i64;
                let mut stored = report.clone();
                stored.opaque = None;
                log.push(stored);
            }
            _ => report.error = ErrorCode::UnknownTopicOrPartition,
        }
        report
    }

    fn partitions_matching(&self, keys: &[TopicKey]) -> Vec<TopicPartition> {
        self.topics
            .iter()
            .filter(|(topic, _)| keys.iter().any(|key| key.matches(topic)))
            .flat_map(|(topic, logs)| {
                (0..logs.len() as i32).map(move |partition| TopicPartition::new(topic.clone(), partition))
            })
            .collect()
    }

    fn log(&self, tp: &TopicPartition) -> Option<&Vec<Record>> {
        self.topics
            .get(&tp.topic)
            .and_then(|logs| logs.get(usize::try_from(tp.partition).ok()?))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

impl InMemoryBroker {
    /// Create a broker whose topics get a single partition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a broker whose auto-created topics get `partitions` partitions.
    pub fn with_partitions(partitions: i32) -> Self {
        let broker = Self::new();
        broker.state().default_partitions = partitions.max(1);
        broker
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self, operation: &'static str) -> BusResult<MutexGuard<'_, BrokerState>> {
        self.state
            .lock()
            .map_err(|_| BusError::LockPoisoned(operation))
    }

    /// Create a topic with an explicit partition count (no-op if it exists).
    pub fn create_topic(&self, topic: &str, partitions: i32) {
        self.state()
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions.max(1) as usize]);
    }

    /// Append a record directly to the log, bypassing any producer.
    pub fn append(&self, record: ProducerRecord) -> BusResult<Record> {
        let report = self.lock("append")?.append(record);
        if report.is_error() {
            return Err(BusError::delivery(report.error));
        }
        Ok(report)
    }

    /// All records of a topic, ordered by partition then offset.
    pub fn records(&self, topic: &str) -> Vec<Record> {
        self.state()
            .topics
            .get(topic)
            .map(|logs| logs.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Names of all existing topics.
    pub fn topics(&self) -> Vec<String> {
        self.state().topics.keys().cloned().collect()
    }

    /// Offset committed by a consumer group for a partition.
    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        self.state()
            .committed
            .get(&(group_id.to_string(), TopicPartition::new(topic, partition)))
            .copied()
    }

    /// Fail every subsequent delivery to `topic` with `code`.
    pub fn fail_deliveries(&self, topic: &str, code: ErrorCode) {
        self.state().delivery_failures.insert(topic.to_string(), code);
    }

    /// Stop failing deliveries to `topic`.
    pub fn restore_deliveries(&self, topic: &str) {
        self.state().delivery_failures.remove(topic);
    }

    /// Queue an error event returned by the next consumer poll.
    pub fn inject_consume_error(&self, code: ErrorCode) {
        self.state().consume_errors.push_back(code);
    }

    /// Queue an error raised through the next consumer rebalance.
    pub fn inject_rebalance_error(&self, code: ErrorCode) {
        self.state().rebalance_errors.push_back(code);
    }

    /// Queue a client-level error served by the next producer or consumer poll.
    pub fn inject_client_error(&self, code: ErrorCode, reason: impl Into<String>) {
        self.state().client_errors.push_back((code, reason.into()));
    }

    /// Hand a pending client error to `callback`.
    fn serve_client_error(&self, callback: &ErrorCallback) -> BusResult<()> {
        let pending = self.lock("poll")?.client_errors.pop_front();
        match pending {
            Some((code, reason)) => {
                debug!(error = %code, %reason, "client error");
                callback(code, &reason)
            }
            None => Ok(()),
        }
    }

    /// Number of consumers that have been closed.
    pub fn closed_consumers(&self) -> usize {
        self.state().closed_consumers
    }
}

fn require_servers(config: &ClientConfig) -> BusResult<()> {
    match config.get(BOOTSTRAP_SERVERS) {
        Some(servers) if !servers.trim().is_empty() => Ok(()),
        _ => Err(BusError::Configuration(format!("{} is required", BOOTSTRAP_SERVERS))),
    }
}

impl BrokerClient for InMemoryBroker {
    type Producer = InMemoryProducer;
    type Consumer = InMemoryConsumer;

    fn create_producer(&self, config: &ClientConfig) -> BusResult<InMemoryProducer> {
        require_servers(config)?;
        let max_queue = match config.get(QUEUE_BUFFERING_MAX_MESSAGES) {
            None => DEFAULT_MAX_QUEUE,
            Some(value) => value.parse::<usize>().ok().filter(|n| *n > 0).ok_or_else(|| {
                BusError::Configuration(format!(
                    "invalid value for {}: {}",
                    QUEUE_BUFFERING_MAX_MESSAGES, value
                ))
            })?,
        };

        Ok(InMemoryProducer {
            broker: self.clone(),
            queue: VecDeque::new(),
            max_queue,
            delivery_callback: config.delivery_callback().cloned(),
            error_callback: config.error_callback(),
        })
    }

    fn create_consumer(&self, config: &ClientConfig) -> BusResult<InMemoryConsumer> {
        require_servers(config)?;
        let group_id = match config.get(GROUP_ID) {
            Some(group) if !group.is_empty() => group.to_string(),
            _ => return Err(BusError::Configuration(format!("{} is required", GROUP_ID))),
        };
        let offset_reset = config
            .get(AUTO_OFFSET_RESET)
            .map(str::parse::<OffsetReset>)
            .transpose()?
            .unwrap_or_default();

        Ok(InMemoryConsumer {
            broker: self.clone(),
            group_id,
            offset_reset,
            auto_commit: config.get_bool(ENABLE_AUTO_COMMIT, true)?,
            partition_eof: config.get_bool(ENABLE_PARTITION_EOF, false)?,
            rebalance_callback: config.rebalance_callback().cloned(),
            error_callback: config.error_callback(),
            subscription: Vec::new(),
            assignment: Vec::new(),
            manual: false,
            in_rebalance: false,
            last_matched: None,
            positions: HashMap::new(),
            eof_reported: HashSet::new(),
            closed: false,
        })
    }
}

/// Producer handle of an [`InMemoryBroker`].
pub struct InMemoryProducer {
    broker: InMemoryBroker,
    queue: VecDeque<ProducerRecord>,
    max_queue: usize,
    delivery_callback: Option<DeliveryCallback>,
    error_callback: ErrorCallback,
}

impl Producer for InMemoryProducer {
    fn publish(&mut self, record: ProducerRecord) -> BusResult<()> {
        if self.queue.len() >= self.max_queue {
            if !record.flags.contains(PublishFlags::BLOCK) {
                let code = ErrorCode::QueueFull;
                return Err(BusError::Publish {
                    code,
                    reason: code.description(),
                });
            }
            // Blocking publish waits for the queue to drain.
            self.poll(Duration::ZERO)?;
        }
        self.queue.push_back(record);
        Ok(())
    }

    fn poll(&mut self, _timeout: Duration) -> BusResult<usize> {
        self.broker.serve_client_error(&self.error_callback)?;

        let mut served = 0;
        while let Some(record) = self.queue.pop_front() {
            let report = {
                let mut state = self.broker.lock("deliver")?;
                match state.delivery_failures.get(&record.topic).copied() {
                    Some(code) => Record {
                        topic: record.topic,
                        partition: record.partition.code(),
                        offset: -1,
                        key: record.key,
                        payload: record.payload,
                        headers: record.headers,
                        timestamp: record.timestamp,
                        opaque: record.opaque,
                        error: code,
                    },
                    None => state.append(record),
                }
            };
            served += 1;

            debug!(
                topic = %report.topic,
                partition = report.partition,
                offset = report.offset,
                error = %report.error,
                "delivery report"
            );
            if let Some(callback) = &self.delivery_callback {
                callback(&report)?;
            }
        }
        Ok(served)
    }

    fn out_queue_len(&self) -> usize {
        self.queue.len()
    }
}

/// Consumer handle of an [`InMemoryBroker`].
pub struct InMemoryConsumer {
    broker: InMemoryBroker,
    group_id: String,
    offset_reset: OffsetReset,
    auto_commit: bool,
    partition_eof: bool,
    rebalance_callback: Option<RebalanceCallback>,
    error_callback: ErrorCallback,
    subscription: Vec<TopicKey>,
    assignment: Vec<TopicPartition>,
    /// Set by an explicit `assign` outside a rebalance; disables group management.
    manual: bool,
    in_rebalance: bool,
    last_matched: Option<Vec<TopicPartition>>,
    positions: HashMap<TopicPartition, i64>,
    eof_reported: HashSet<TopicPartition>,
    closed: bool,
}

impl InMemoryConsumer {
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Next offset this consumer will read from a partition, once known.
    pub fn position(&self, tp: &TopicPartition) -> Option<i64> {
        self.positions.get(tp).copied()
    }

    /// Current subscription as passed to the broker.
    pub fn subscription(&self) -> Vec<String> {
        self.subscription
            .iter()
            .map(|key| key.as_str().to_string())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> BusResult<()> {
        if self.closed {
            return Err(BusError::Closed);
        }
        Ok(())
    }

    fn fire(&mut self, event: RebalanceEvent) -> BusResult<()> {
        trace!(group = %self.group_id, ?event, "rebalance");
        match self.rebalance_callback.clone() {
            Some(callback) => {
                self.in_rebalance = true;
                let consumer: &mut dyn Consumer = &mut *self;
                let result = callback(consumer, event);
                self.in_rebalance = false;
                result
            }
            None => match event {
                RebalanceEvent::Assign(partitions) => {
                    self.assignment = partitions;
                    Ok(())
                }
                RebalanceEvent::Revoke(_) => {
                    self.assignment.clear();
                    Ok(())
                }
                RebalanceEvent::Error(code) => Err(BusError::Rebalance(code)),
            },
        }
    }

    /// Hand out partitions whenever the set matching the subscription changes.
    fn rebalance(&mut self) -> BusResult<()> {
        if self.manual || self.subscription.is_empty() {
            return Ok(());
        }

        let (injected, matched) = {
            let mut state = self.broker.lock("rebalance")?;
            (
                state.rebalance_errors.pop_front(),
                state.partitions_matching(&self.subscription),
            )
        };
        if let Some(code) = injected {
            return self.fire(RebalanceEvent::Error(code));
        }
        if self.last_matched.as_ref() == Some(&matched) {
            return Ok(());
        }

        if !self.assignment.is_empty() {
            self.fire(RebalanceEvent::Revoke(self.assignment.clone()))?;
        }
        self.last_matched = Some(matched.clone());
        self.fire(RebalanceEvent::Assign(matched))
    }

    fn next_record(&mut self) -> BusResult<Option<Record>> {
        let mut state = self.broker.lock("poll")?;

        for tp in &self.assignment {
            let Some(len) = state.log(tp).map(|log| log.len() as i64) else {
                continue;
            };

            let position = match self.positions.get(tp) {
                Some(position) => *position,
                None => {
                    let committed = state.committed.get(&(self.group_id.clone(), tp.clone()));
                    let start = match (committed, self.offset_reset) {
                        (Some(offset), _) => *offset,
                        (None, OffsetReset::Earliest) => 0,
                        (None, OffsetReset::Latest) => len,
                        (None, OffsetReset::Error) => {
                            return Ok(Some(Record {
                                topic: tp.topic.clone(),
                                partition: tp.partition,
                                offset: -1,
                                error: ErrorCode::AutoOffsetReset,
                                ..Record::default()
                            }));
                        }
                    };
                    self.positions.insert(tp.clone(), start);
                    start
                }
            };

            if position < len {
                let record = state
                    .log(tp)
                    .and_then(|log| log.get(position as usize))
                    .cloned();
                if let Some(record) = record {
                    self.positions.insert(tp.clone(), position + 1);
                    self.eof_reported.remove(tp);
                    if self.auto_commit {
                        state
                            .committed
                            .insert((self.group_id.clone(), tp.clone()), position + 1);
                    }
                    return Ok(Some(record));
                }
            } else if self.partition_eof && self.eof_reported.insert(tp.clone()) {
                return Ok(Some(Record {
                    topic: tp.topic.clone(),
                    partition: tp.partition,
                    offset: position,
                    error: ErrorCode::PartitionEof,
                    ..Record::default()
                }));
            }
        }

        Ok(None)
    }
}

impl Consumer for InMemoryConsumer {
    fn subscribe(&mut self, topics: &[String]) -> BusResult<()> {
        self.ensure_open()?;
        if topics.is_empty() {
            return Err(BusError::Configuration(
                "subscription requires at least one topic".into(),
            ));
        }

        let keys = topics
            .iter()
            .map(|topic| TopicKey::parse(topic))
            .collect::<BusResult<Vec<_>>>()?;
        {
            let mut state = self.broker.lock("subscribe")?;
            for key in keys.iter().filter(|key| !key.is_pattern()) {
                state.ensure_topic(key.as_str());
            }
        }

        self.subscription = keys;
        self.manual = false;
        self.last_matched = None;
        Ok(())
    }

    fn assign(&mut self, partitions: Option<Vec<TopicPartition>>) -> BusResult<()> {
        self.ensure_open()?;
        if !self.in_rebalance {
            self.manual = partitions.is_some();
        }
        self.assignment = partitions.unwrap_or_default();
        let assigned: HashSet<&TopicPartition> = self.assignment.iter().collect();
        self.eof_reported.retain(|tp| assigned.contains(tp));
        Ok(())
    }

    fn assignment(&self) -> Vec<TopicPartition> {
        self.assignment.clone()
    }

    fn poll(&mut self, timeout: Duration) -> BusResult<Record> {
        self.ensure_open()?;
        self.broker.serve_client_error(&self.error_callback)?;
        self.rebalance()?;

        if let Some(code) = self.broker.lock("poll")?.consume_errors.pop_front() {
            return Ok(Record::error_event(code));
        }

        // No deadline when the timeout does not fit in an `Instant`.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if let Some(record) = self.next_record()? {
                return Ok(record);
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(Record::error_event(ErrorCode::TimedOut));
            }

            // Small sleep to avoid busy-waiting
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn commit(&mut self, _mode: CommitMode) -> BusResult<()> {
        self.ensure_open()?;
        let mut state = self.broker.lock("commit")?;
        for tp in &self.assignment {
            if let Some(position) = self.positions.get(tp) {
                state
                    .committed
                    .insert((self.group_id.clone(), tp.clone()), *position);
            }
        }
        Ok(())
    }

    fn unsubscribe(&mut self) -> BusResult<()> {
        self.ensure_open()?;
        self.subscription.clear();
        self.assignment.clear();
        self.manual = false;
        self.last_matched = None;
        Ok(())
    }

    fn close(&mut self) -> BusResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.assignment.clear();
        self.broker.lock("close")?.closed_consumers += 1;
        Ok(())
    }
}
