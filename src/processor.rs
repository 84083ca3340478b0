//! Inbound side of the bus: the consume loop.
//!
//! `handle` drives one consumer through
//! `subscribe → (poll → process | error → commit)* → unsubscribe → close`.
//! Exactly one record is in flight at a time: the next poll happens only after
//! the previous record's handlers and commit step have returned.
//!
//! Shutdown is cooperative. Clearing the subscribe flag (directly or through a
//! [`SubscriptionHandle`]) is observed at the next iteration boundary, so the
//! record being processed still completes. Fatal errors return immediately
//! without unsubscribing; dropping the consumer handle is the only cleanup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::broker::{
    BrokerClient, ClientConfig, Consumer, OffsetReset, RebalanceEvent, Record, TopicPartition,
    AUTO_OFFSET_RESET, ENABLE_AUTO_COMMIT, GROUP_ID, MESSAGE_ID_HEADER,
};
use crate::error::{BusError, BusResult, HandlerError};
use crate::message::Message;
use crate::provider::{
    message_from_headers, resolve_commit_provider, resolve_error_provider,
    resolve_message_provider, CommitProvider, ErrorProvider, MessageProvider,
};
use crate::registry::{Handler, HandlerRegistry};
use crate::settings::ProcessorSettings;
use crate::topic::normalize;

/// Shared view of a processor's subscribe flag.
///
/// Handlers capture a handle to stop the loop they run in.
#[derive(Clone, Debug)]
pub struct SubscriptionHandle {
    flag: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    /// Request a graceful shutdown at the next iteration boundary.
    pub fn unsubscribe(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_subscribed(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Consumes records and routes them to registered handlers.
///
/// ## Example
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use std::time::Duration;
///
/// use kafka_message_bus::broker::{ClientConfig, InMemoryBroker, OffsetReset};
/// use kafka_message_bus::{Message, MessageDispatcher, MessageProcessor};
///
/// let broker = InMemoryBroker::new();
/// let config = ClientConfig::for_servers("localhost:9092");
///
/// MessageDispatcher::new(broker.clone(), config.clone())
///     .dispatch(Message::new("orders.created", Some(b"{}".to_vec())))
///     .unwrap();
///
/// let mut processor = MessageProcessor::new(broker, config, "billing")
///     .with_auto_offset_reset(OffsetReset::Earliest)
///     .with_timeout(Duration::from_millis(10));
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let handle = processor.subscription_handle();
/// let sink = Arc::clone(&seen);
/// processor
///     .on("orders.created", move |message: &Message| {
///         sink.lock().unwrap().push(message.message_id().to_string());
///         handle.unsubscribe();
///         Ok(())
///     })
///     .unwrap();
///
/// processor.handle(None).unwrap();
/// assert_eq!(seen.lock().unwrap().len(), 1);
/// ```
pub struct MessageProcessor<C: BrokerClient> {
    client: C,
    config: ClientConfig,
    registry: HandlerRegistry,
    timeout: Duration,
    partitions: Option<Vec<TopicPartition>>,
    message_provider: Option<Arc<dyn MessageProvider>>,
    commit_provider: Option<Arc<dyn CommitProvider>>,
    error_provider: Option<Arc<dyn ErrorProvider>>,
    auto_commit: bool,
    subscribe: Arc<AtomicBool>,
}

fn on_rebalance(consumer: &mut dyn Consumer, event: RebalanceEvent) -> BusResult<()> {
    match event {
        RebalanceEvent::Assign(partitions) => consumer.assign(Some(partitions)),
        RebalanceEvent::Revoke(_) => consumer.assign(None),
        RebalanceEvent::Error(code) => Err(BusError::Rebalance(code)),
    }
}

impl<C: BrokerClient> MessageProcessor<C> {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a processor for a consumer group.
    ///
    /// The group id is normalized like a topic name. Auto-commit starts
    /// enabled and a rebalance callback is installed on `config`.
    pub fn new(client: C, mut config: ClientConfig, group_id: &str) -> Self {
        config
            .set(GROUP_ID, normalize(group_id))
            .set(ENABLE_AUTO_COMMIT, "true")
            .set_rebalance_callback(Arc::new(on_rebalance));

        Self {
            client,
            config,
            registry: HandlerRegistry::new(),
            timeout: Self::DEFAULT_TIMEOUT,
            partitions: None,
            message_provider: None,
            commit_provider: None,
            error_provider: None,
            auto_commit: true,
            subscribe: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Build a processor from serialized settings.
    pub fn from_settings(client: C, settings: &ProcessorSettings) -> BusResult<Self> {
        let mut processor = Self::new(client, settings.client_config(), &settings.group_id)
            .with_auto_offset_reset(settings.auto_offset_reset)
            .with_auto_commit(settings.auto_commit)
            .with_timeout(Duration::from_millis(settings.timeout_ms));
        processor.set_partitions(settings.partitions.clone());

        if let Some(name) = &settings.message_provider {
            processor.set_message_provider_named(name)?;
        }
        if let Some(name) = &settings.commit_provider {
            processor.set_commit_provider_named(name)?;
        }
        if let Some(name) = &settings.error_provider {
            processor.set_error_provider_named(name)?;
        }
        Ok(processor)
    }

    pub fn with_auto_offset_reset(mut self, reset: OffsetReset) -> Self {
        self.set_auto_offset_reset(reset);
        self
    }

    pub fn with_auto_commit(mut self, enabled: bool) -> Self {
        self.set_auto_commit(enabled);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_partitions(mut self, partitions: Vec<TopicPartition>) -> Self {
        self.partitions = Some(partitions);
        self
    }

    pub fn with_message_provider(mut self, provider: Arc<dyn MessageProvider>) -> Self {
        self.message_provider = Some(provider);
        self
    }

    pub fn with_commit_provider(mut self, provider: Arc<dyn CommitProvider>) -> Self {
        self.commit_provider = Some(provider);
        self
    }

    pub fn with_error_provider(mut self, provider: Arc<dyn ErrorProvider>) -> Self {
        self.error_provider = Some(provider);
        self
    }

    pub fn set_group_id(&mut self, group_id: &str) {
        self.config.set(GROUP_ID, normalize(group_id));
    }

    pub fn group_id(&self) -> Option<&str> {
        self.config.get(GROUP_ID)
    }

    pub fn set_auto_offset_reset(&mut self, reset: OffsetReset) {
        self.config.set(AUTO_OFFSET_RESET, reset.as_str());
    }

    /// Enable or disable broker-side auto-commit.
    ///
    /// With auto-commit disabled the commit provider, if any, runs after
    /// every iteration.
    pub fn set_auto_commit(&mut self, enabled: bool) {
        self.auto_commit = enabled;
        self.config.set(ENABLE_AUTO_COMMIT, enabled.to_string());
    }

    pub fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    /// Explicit assignment applied after subscribing; `None` restores group
    /// management.
    pub fn set_partitions(&mut self, partitions: Option<Vec<TopicPartition>>) {
        self.partitions = partitions;
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_message_provider(&mut self, provider: Option<Arc<dyn MessageProvider>>) {
        self.message_provider = provider;
    }

    pub fn set_message_provider_named(&mut self, name: &str) -> BusResult<()> {
        self.message_provider = Some(resolve_message_provider(name)?);
        Ok(())
    }

    pub fn set_commit_provider(&mut self, provider: Option<Arc<dyn CommitProvider>>) {
        self.commit_provider = provider;
    }

    pub fn set_commit_provider_named(&mut self, name: &str) -> BusResult<()> {
        self.commit_provider = Some(resolve_commit_provider(name)?);
        Ok(())
    }

    pub fn set_error_provider(&mut self, provider: Option<Arc<dyn ErrorProvider>>) {
        self.error_provider = provider;
    }

    pub fn set_error_provider_named(&mut self, name: &str) -> BusResult<()> {
        self.error_provider = Some(resolve_error_provider(name)?);
        Ok(())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Request a graceful shutdown of the running loop.
    pub fn unsubscribe(&self) {
        self.subscribe.store(false, Ordering::SeqCst);
    }

    /// Set the subscribe flag; `true` re-arms a processor that was stopped.
    pub fn set_subscribe(&self, subscribe: bool) {
        self.subscribe.store(subscribe, Ordering::SeqCst);
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribe.load(Ordering::SeqCst)
    }

    pub fn subscription_handle(&self) -> SubscriptionHandle {
        SubscriptionHandle {
            flag: Arc::clone(&self.subscribe),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Register a shared handler under a topic name or `^` pattern.
    pub fn add_handler(&mut self, topic: &str, handler: Arc<dyn Handler>) -> BusResult<&mut Self> {
        self.registry.register(topic, handler)?;
        Ok(self)
    }

    /// Register a shared handler under the topic of `message`.
    pub fn add_handler_for(&mut self, message: &Message, handler: Arc<dyn Handler>) -> BusResult<&mut Self> {
        self.registry.register_for(message, handler)?;
        Ok(self)
    }

    /// Register a closure under a topic name or `^` pattern.
    pub fn on<F>(&mut self, topic: &str, handler: F) -> BusResult<&mut Self>
    where
        F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.registry.on(topic, handler)?;
        Ok(self)
    }

    pub fn clear_handlers(&mut self, topic: &str) -> bool {
        self.registry.clear(topic)
    }

    pub fn handlers_for(&self, message: &Message) -> Vec<Arc<dyn Handler>> {
        self.registry.handlers_for(message)
    }

    /// Run the consume loop until the subscribe flag is cleared.
    ///
    /// With `Some(message)` only the message's topic is subscribed; otherwise
    /// every registered key is.
    pub fn handle(&mut self, message: Option<&Message>) -> BusResult<()> {
        let topics = match message {
            Some(message) => vec![normalize(message.name())],
            None => self.registry.topics(),
        };

        let mut consumer = self.client.create_consumer(&self.config)?;
        consumer.subscribe(&topics)?;
        if let Some(partitions) = &self.partitions {
            consumer.assign(Some(partitions.clone()))?;
        }
        info!(
            group = self.group_id().unwrap_or_default(),
            ?topics,
            partitions = ?self.partitions,
            "subscribed"
        );

        while self.is_subscribed() {
            let record = consumer.poll(self.timeout)?;
            if record.is_error() {
                self.on_error(&record)?;
            } else {
                self.process(&record)?;
            }

            if !self.auto_commit {
                if let Some(provider) = &self.commit_provider {
                    provider.commit(&mut consumer)?;
                }
            }
        }

        info!(group = self.group_id().unwrap_or_default(), "consume loop stopped");
        consumer.unsubscribe()?;
        consumer.close()?;
        info!(group = self.group_id().unwrap_or_default(), "consumer closed");
        Ok(())
    }

    /// Rebuild a message; records without a `message_id` header are skipped
    /// whichever provider is installed.
    fn reconstruct(&self, record: &Record) -> Option<Message> {
        record.header(MESSAGE_ID_HEADER)?;
        match &self.message_provider {
            Some(provider) => provider.message(record),
            None => message_from_headers(record),
        }
    }

    fn process(&self, record: &Record) -> BusResult<()> {
        let Some(message) = self
            .reconstruct(record)
            .filter(|message| !message.name().is_empty())
        else {
            trace!(topic = %record.topic, offset = record.offset, "skipping record");
            return Ok(());
        };

        let handlers = self.registry.handlers_for(&message);
        debug!(
            topic = %record.topic,
            offset = record.offset,
            message_id = %message.message_id(),
            handlers = handlers.len(),
            "handling message"
        );

        for handler in handlers {
            handler
                .handle(&message)
                .map_err(|source| BusError::Handler {
                    topic: record.topic.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    fn on_error(&self, record: &Record) -> BusResult<()> {
        match &self.error_provider {
            Some(provider) => provider.on_error(record),
            None if record.error.is_benign() => {
                trace!(topic = %record.topic, error = %record.error, "ignoring consume event");
                Ok(())
            }
            None => Err(BusError::consume(record.error)),
        }
    }
}
