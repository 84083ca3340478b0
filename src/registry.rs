//! Handler registry: maps topic keys to ordered handler lists.
//!
//! Keys are exact topic names or `^` patterns, normalized and classified at
//! registration. Lookup prefers an exact match; only when none exists are the
//! patterns consulted.

use std::sync::Arc;

use crate::error::{BusResult, HandlerError};
use crate::message::Message;
use crate::topic::{normalize, TopicKey};

/// A message handler.
pub trait Handler: Send + Sync {
    fn handle(&self, message: &Message) -> Result<(), HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        self(message)
    }
}

struct Entry {
    key: TopicKey,
    handlers: Vec<Arc<dyn Handler>>,
}

/// Ordered registry of handlers per topic key.
///
/// Registration order is preserved both across keys and within a key, and the
/// same handler may be registered more than once.
///
/// ## Example
///
/// ```
/// use kafka_message_bus::{HandlerRegistry, Message};
///
/// let mut registry = HandlerRegistry::new();
/// registry
///     .on("orders.created", |_message: &Message| Ok(()))
///     .unwrap()
///     .on(r"^orders\..*", |_message: &Message| Ok(()))
///     .unwrap();
///
/// assert_eq!(registry.resolve("orders.created").len(), 1);
/// assert_eq!(registry.resolve("orders.shipped").len(), 1);
/// assert!(registry.resolve("invoices.sent").is_empty());
/// ```
#[derive(Default)]
pub struct HandlerRegistry {
    entries: Vec<Entry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shared handler under a raw topic name or pattern.
    pub fn register(&mut self, topic: &str, handler: Arc<dyn Handler>) -> BusResult<&mut Self> {
        let key = TopicKey::parse(topic)?;
        Ok(self.register_key(key, handler))
    }

    /// Register a handler under an already classified key.
    pub fn register_key(&mut self, key: TopicKey, handler: Arc<dyn Handler>) -> &mut Self {
        match self.entries.iter_mut().find(|entry| entry.key == key) {
            Some(entry) => entry.handlers.push(handler),
            None => self.entries.push(Entry {
                key,
                handlers: vec![handler],
            }),
        }
        self
    }

    /// Register a closure under a raw topic name or pattern.
    pub fn on<F>(&mut self, topic: &str, handler: F) -> BusResult<&mut Self>
    where
        F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.register(topic, Arc::new(handler))
    }

    /// Register a handler for the topic of `message`.
    pub fn register_for(&mut self, message: &Message, handler: Arc<dyn Handler>) -> BusResult<&mut Self> {
        self.register(message.name(), handler)
    }

    /// Handlers for a normalized topic name, in invocation order.
    ///
    /// An exact entry is returned alone. Otherwise matching patterns are merged
    /// by position in registration order: a later pattern only contributes the
    /// handlers at positions the result does not have yet.
    pub fn resolve(&self, topic: &str) -> Vec<Arc<dyn Handler>> {
        if let Some(entry) = self
            .entries
            .iter()
            .find(|entry| !entry.key.is_pattern() && entry.key.as_str() == topic)
        {
            return entry.handlers.clone();
        }

        let mut resolved: Vec<Arc<dyn Handler>> = Vec::new();
        for entry in self
            .entries
            .iter()
            .filter(|entry| entry.key.is_pattern() && entry.key.matches(topic))
        {
            if let Some(extra) = entry.handlers.get(resolved.len()..) {
                resolved.extend(extra.iter().cloned());
            }
        }
        resolved
    }

    /// Handlers for the topic of `message`.
    pub fn handlers_for(&self, message: &Message) -> Vec<Arc<dyn Handler>> {
        self.resolve(&normalize(message.name()))
    }

    /// Remove every handler registered under an exact topic name.
    ///
    /// Returns whether an entry was removed. Patterns are not affected.
    pub fn clear(&mut self, topic: &str) -> bool {
        let topic = normalize(topic);
        let before = self.entries.len();
        self.entries
            .retain(|entry| entry.key.is_pattern() || entry.key.as_str() != topic);
        self.entries.len() != before
    }

    /// Registered keys in registration order, as passed to a broad subscribe.
    pub fn topics(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.key.as_str().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
