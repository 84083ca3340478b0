//! Topic name normalization and registry keys.
//!
//! Broker topic names are limited to 255 characters from `[a-zA-Z0-9._-]`.
//! Domain message names are free-form (`Orders\Created Event`), so every name
//! goes through [`normalize`] before it is used as a topic. Names starting
//! with `^` are regular expressions and pass through untouched.

use std::fmt;

use regex::Regex;

use crate::error::{BusError, BusResult};

/// Maximum length of a broker topic name.
pub const MAX_TOPIC_LEN: usize = 255;

/// Leading character marking a topic name as a pattern.
pub const PATTERN_PREFIX: char = '^';

const NAMESPACE_SEPARATOR: char = '\\';

/// Convert a domain message name into a broker-legal topic name.
///
/// Namespace separators become `.`, spaces become `_`, every other character
/// outside `[a-zA-Z0-9._-]` is dropped, and only the last 255 characters are
/// kept so the most specific segment survives.
///
/// ```
/// use kafka_message_bus::normalize;
///
/// assert_eq!(normalize("Orders\\Created Event"), "Orders.Created_Event");
/// assert_eq!(normalize("^user\\..*"), "^user\\..*");
/// ```
pub fn normalize(raw: &str) -> String {
    if is_pattern(raw) {
        return raw.to_string();
    }

    let name: String = raw
        .chars()
        .map(|c| match c {
            NAMESPACE_SEPARATOR => '.',
            ' ' => '_',
            other => other,
        })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(*c, '.' | '_' | '-'))
        .collect();

    // ASCII only from here on, so byte offsets are char offsets.
    match name.len().checked_sub(MAX_TOPIC_LEN) {
        Some(excess) if excess > 0 => name[excess..].to_string(),
        _ => name,
    }
}

/// Whether a raw name is a pattern expression.
pub fn is_pattern(raw: &str) -> bool {
    raw.starts_with(PATTERN_PREFIX)
}

/// A registry key: either an exact topic or a compiled pattern.
///
/// Resolved once at registration so lookups never re-inspect the name.
#[derive(Clone, Debug)]
pub enum TopicKey {
    Exact(String),
    Pattern(Regex),
}

impl TopicKey {
    /// Normalize `raw` and classify it, compiling patterns.
    pub fn parse(raw: &str) -> BusResult<Self> {
        let name = normalize(raw);
        if is_pattern(&name) {
            let regex = Regex::new(&name).map_err(|source| BusError::InvalidPattern {
                pattern: name.clone(),
                source,
            })?;
            Ok(TopicKey::Pattern(regex))
        } else {
            Ok(TopicKey::Exact(name))
        }
    }

    /// The key as it is passed to the broker on subscribe.
    pub fn as_str(&self) -> &str {
        match self {
            TopicKey::Exact(name) => name,
            TopicKey::Pattern(regex) => regex.as_str(),
        }
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, TopicKey::Pattern(_))
    }

    /// Whether a concrete topic name falls under this key.
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            TopicKey::Exact(name) => name == topic,
            TopicKey::Pattern(regex) => regex.is_match(topic),
        }
    }
}

impl PartialEq for TopicKey {
    fn eq(&self, other: &Self) -> bool {
        self.is_pattern() == other.is_pattern() && self.as_str() == other.as_str()
    }
}

impl Eq for TopicKey {}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
