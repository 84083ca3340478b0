//! Broker client seam.
//!
//! The bus never talks to a broker directly. It goes through the traits in
//! this module, so the wire protocol, connection management and partition
//! assignment mechanics stay inside the client.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐        ┌──────────────────────────┐
//! │    MessageDispatcher     │        │     MessageProcessor     │
//! │ publish → poll until     │        │ subscribe → poll → route │
//! │ the outbound queue drains│        │ → commit → … → close     │
//! └──────────────────────────┘        └──────────────────────────┘
//!              │                                   │
//!              ▼                                   ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │        BrokerClient (ClientConfig + callbacks)              │
//! │  Producer: publish / poll / out_queue_len                   │
//! │  Consumer: subscribe / assign / poll / commit / close       │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                   │
//!          ▼                                   ▼
//! ┌──────────────────┐              ┌───────────────────────────┐
//! │  InMemoryBroker  │              │  librdkafka-backed client │
//! │   (included)     │              │        (external)         │
//! └──────────────────┘              └───────────────────────────┘
//! ```

mod client;
mod config;
mod in_memory;
mod record;

pub use client::{BrokerClient, Consumer, Producer, RebalanceEvent};
pub use config::{
    ClientConfig, CommitMode, DeliveryCallback, ErrorCallback, OffsetReset, RebalanceCallback,
    AUTO_OFFSET_RESET, BOOTSTRAP_SERVERS, ENABLE_AUTO_COMMIT, ENABLE_PARTITION_EOF, GROUP_ID,
    QUEUE_BUFFERING_MAX_MESSAGES,
};
pub use in_memory::{InMemoryBroker, InMemoryConsumer, InMemoryProducer};
pub use record::{
    ErrorCode, Headers, Partition, ProducerRecord, PublishFlags, Record, TopicPartition,
    CAUSATION_ID_HEADER, CORRELATION_ID_HEADER, MESSAGE_ID_HEADER,
};
