//! Shared fixtures for the message bus suite.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use kafka_message_bus::broker::{ClientConfig, ErrorCode, InMemoryBroker, OffsetReset, Record};
use kafka_message_bus::{
    BusError, ErrorProvider, Handler, HandlerError, Message, MessageDispatcher, MessageProcessor,
    SubscriptionHandle,
};

pub const SERVERS: &str = "localhost:9092";
pub const GROUP: &str = "billing";

/// Poll timeout used by processors in this suite.
pub const POLL: Duration = Duration::from_millis(10);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config() -> ClientConfig {
    ClientConfig::for_servers(SERVERS)
}

pub fn dispatcher(broker: &InMemoryBroker) -> MessageDispatcher<InMemoryBroker> {
    MessageDispatcher::new(broker.clone(), config())
}

/// Processor reading from the beginning of every partition.
pub fn processor(broker: &InMemoryBroker) -> MessageProcessor<InMemoryBroker> {
    init_tracing();
    MessageProcessor::new(broker.clone(), config(), GROUP)
        .with_auto_offset_reset(OffsetReset::Earliest)
        .with_timeout(POLL)
}

/// Publish one message per name, in order.
pub fn publish(broker: &InMemoryBroker, names: &[&str]) -> Vec<Message> {
    let dispatcher = dispatcher(broker);
    names
        .iter()
        .map(|name| {
            dispatcher
                .dispatch(Message::new(*name, Some(name.as_bytes().to_vec())))
                .unwrap()
        })
        .collect()
}

/// Error provider that ends the loop once the consumer runs dry.
///
/// End-of-partition is ignored, anything else is fatal.
pub fn stop_when_idle(handle: SubscriptionHandle) -> Arc<dyn ErrorProvider> {
    Arc::new(move |record: &Record| -> Result<(), BusError> {
        match record.error {
            ErrorCode::TimedOut => {
                handle.unsubscribe();
                Ok(())
            }
            ErrorCode::PartitionEof => Ok(()),
            code => Err(BusError::consume(code)),
        }
    })
}

/// Processor that drains whatever is available and then stops.
pub fn draining_processor(broker: &InMemoryBroker) -> MessageProcessor<InMemoryBroker> {
    let processor = processor(broker);
    let handle = processor.subscription_handle();
    processor.with_error_provider(stop_when_idle(handle))
}

/// Records `label:name` for every message a handler sees.
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler(&self, label: &'static str) -> Arc<dyn Handler> {
        Arc::new(Labelled {
            label,
            seen: Arc::clone(&self.seen),
        })
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

struct Labelled {
    label: &'static str,
    seen: Arc<Mutex<Vec<String>>>,
}

impl Handler for Labelled {
    fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        self.seen
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.label, message.name()));
        Ok(())
    }
}
