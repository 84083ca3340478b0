pub mod broker;
mod dispatcher;
mod error;
mod message;
mod processor;
pub mod provider;
mod registry;
pub mod settings;
mod topic;

pub use dispatcher::MessageDispatcher;
pub use error::{BusError, BusResult, HandlerError};
pub use message::Message;
pub use processor::{MessageProcessor, SubscriptionHandle};
pub use provider::{CommitProvider, ErrorProvider, MessageProvider, PayloadProvider};
pub use registry::{Handler, HandlerRegistry};
pub use settings::{DispatcherSettings, ProcessorSettings};
pub use topic::{is_pattern, normalize, TopicKey, MAX_TOPIC_LEN, PATTERN_PREFIX};
