//! Outbound side of the bus.
//!
//! A dispatch maps one [`Message`] to one broker record:
//!
//! | Record field | Source |
//! |--------------|--------|
//! | topic | normalized message name |
//! | key | correlation id |
//! | payload | payload provider, else the message content |
//! | headers | `message_id`, `correlation_id`, `causation_id` |
//! | timestamp | message timestamp |
//! | opaque | message id |
//!
//! The call returns only after the producer's outbound queue has drained, so
//! a successful return means the broker acknowledged the record.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::broker::{
    BrokerClient, ClientConfig, Partition, Producer, ProducerRecord, PublishFlags, Record,
    CAUSATION_ID_HEADER, CORRELATION_ID_HEADER, MESSAGE_ID_HEADER,
};
use crate::error::{BusError, BusResult};
use crate::message::Message;
use crate::provider::{resolve_payload_provider, PayloadProvider};
use crate::settings::DispatcherSettings;
use crate::topic::normalize;

/// Publishes messages through a [`BrokerClient`].
///
/// ## Example
///
/// ```
/// use kafka_message_bus::broker::{ClientConfig, InMemoryBroker};
/// use kafka_message_bus::{Message, MessageDispatcher};
///
/// let broker = InMemoryBroker::new();
/// let dispatcher = MessageDispatcher::new(broker.clone(), ClientConfig::for_servers("localhost:9092"));
///
/// let message = dispatcher
///     .dispatch(Message::new("Orders\\Created", Some(b"{}".to_vec())))
///     .unwrap();
///
/// let records = broker.records("Orders.Created");
/// assert_eq!(records.len(), 1);
/// assert_eq!(records[0].key.as_deref(), Some(message.correlation_id()));
/// ```
pub struct MessageDispatcher<C: BrokerClient> {
    client: C,
    config: ClientConfig,
    payload_provider: Option<Arc<dyn PayloadProvider>>,
    partition: Partition,
    flags: PublishFlags,
    poll_timeout: Duration,
    delivery_report: Arc<Mutex<Option<Record>>>,
}

impl<C: BrokerClient> MessageDispatcher<C> {
    pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a dispatcher; installs a delivery callback on `config`.
    ///
    /// The callback records every delivery report and turns a failed report
    /// into a [`BusError::Delivery`], which aborts the dispatch.
    pub fn new(client: C, mut config: ClientConfig) -> Self {
        let delivery_report = Arc::new(Mutex::new(None));
        let report = Arc::clone(&delivery_report);
        config.set_delivery_callback(Arc::new(move |record: &Record| -> BusResult<()> {
            *report
                .lock()
                .map_err(|_| BusError::LockPoisoned("delivery report"))? = Some(record.clone());
            if record.is_error() {
                return Err(BusError::delivery(record.error));
            }
            Ok(())
        }));

        Self {
            client,
            config,
            payload_provider: None,
            partition: Partition::Unassigned,
            flags: PublishFlags::default(),
            poll_timeout: Self::DEFAULT_POLL_TIMEOUT,
            delivery_report,
        }
    }

    /// Build a dispatcher from serialized settings.
    pub fn from_settings(client: C, settings: &DispatcherSettings) -> BusResult<Self> {
        let mut dispatcher = Self::new(client, settings.client_config())
            .with_partition(settings.partition)
            .with_flags(settings.publish_flags)
            .with_poll_timeout(Duration::from_millis(settings.poll_timeout_ms));
        if let Some(name) = &settings.payload_provider {
            dispatcher.set_payload_provider_named(name)?;
        }
        Ok(dispatcher)
    }

    pub fn with_payload_provider(mut self, provider: Arc<dyn PayloadProvider>) -> Self {
        self.payload_provider = Some(provider);
        self
    }

    pub fn with_partition(mut self, partition: impl Into<Partition>) -> Self {
        self.partition = partition.into();
        self
    }

    pub fn with_flags(mut self, flags: PublishFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn set_payload_provider(&mut self, provider: Option<Arc<dyn PayloadProvider>>) {
        self.payload_provider = provider;
    }

    /// Use a built-in payload provider (`content` or `json`).
    pub fn set_payload_provider_named(&mut self, name: &str) -> BusResult<()> {
        self.payload_provider = Some(resolve_payload_provider(name)?);
        Ok(())
    }

    pub fn set_partition(&mut self, partition: impl Into<Partition>) {
        self.partition = partition.into();
    }

    pub fn set_flags(&mut self, flags: PublishFlags) {
        self.flags = flags;
    }

    pub fn set_poll_timeout(&mut self, timeout: Duration) {
        self.poll_timeout = timeout;
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    pub fn flags(&self) -> PublishFlags {
        self.flags
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Most recent delivery report seen by this dispatcher.
    pub fn delivery_report(&self) -> Option<Record> {
        self.delivery_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record_for(&self, message: &Message) -> ProducerRecord {
        let payload = match &self.payload_provider {
            Some(provider) => provider.payload(message),
            None => message.content().map(<[u8]>::to_vec),
        };

        ProducerRecord::to(normalize(message.name()))
            .partition(self.partition)
            .flags(self.flags)
            .key(message.correlation_id())
            .payload(payload)
            .header(MESSAGE_ID_HEADER, message.message_id())
            .header(CORRELATION_ID_HEADER, message.correlation_id())
            .header(CAUSATION_ID_HEADER, message.causation_id())
            .timestamp(message.timestamp())
            .opaque(message.message_id())
    }

    fn drain(&self, producer: &mut C::Producer) -> BusResult<()> {
        while producer.out_queue_len() > 0 {
            producer.poll(self.poll_timeout)?;
        }
        Ok(())
    }

    /// Publish a message and wait for its delivery.
    ///
    /// Returns the message unchanged on success.
    pub fn dispatch(&self, message: Message) -> BusResult<Message> {
        let mut producer = self.client.create_producer(&self.config)?;
        let record = self.record_for(&message);

        debug!(
            topic = %record.topic,
            message_id = %message.message_id(),
            correlation_id = %message.correlation_id(),
            partition = ?self.partition,
            "dispatching message"
        );

        producer.publish(record)?;
        self.drain(&mut producer)?;
        Ok(message)
    }

    /// Publish several messages through one producer and wait for all of them.
    ///
    /// The first failed delivery aborts the batch; records queued before it
    /// may already have been delivered.
    pub fn dispatch_batch(&self, messages: Vec<Message>) -> BusResult<Vec<Message>> {
        if messages.is_empty() {
            return Ok(messages);
        }

        let mut producer = self.client.create_producer(&self.config)?;
        for message in &messages {
            producer.publish(self.record_for(message))?;
        }
        debug!(count = messages.len(), "dispatching batch");

        self.drain(&mut producer)?;
        Ok(messages)
    }
}
