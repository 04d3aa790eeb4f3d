//! Composite topic keys and segment-intersection filtering.
//!
//! A topic is an ordered list of opaque segments joined by [`SEPARATOR`],
//! conventionally `<event-kind>[:<scope-segment>...]`. Subscribers match
//! on a *set* of required segments rather than on the exact string, so a
//! publisher can append extra scoping (e.g. a user id) without breaking
//! consumers that only care about the event kind.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{BusError, Result};

/// Segment separator.
pub const SEPARATOR: char = ':';

/// Split a topic string into its ordered segments.
///
/// Used identically on both sides of the bus: publishers build topics with
/// it and subscribers compare against their requirements with it.
pub fn split_topic(topic: &str) -> Vec<&str> {
    topic.split(SEPARATOR).collect()
}

fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(BusError::InvalidSegment {
            segment: segment.to_string(),
            reason: "segment is empty",
        });
    }
    if segment.contains(SEPARATOR) {
        return Err(BusError::InvalidSegment {
            segment: segment.to_string(),
            reason: "segment contains the separator",
        });
    }
    Ok(())
}

/// A validated topic address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic(String);

impl Topic {
    /// Build a topic from segments. Every segment must be non-empty and
    /// free of the separator.
    pub fn new<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut joined = String::new();
        for (i, segment) in segments.into_iter().enumerate() {
            let segment = segment.as_ref();
            validate_segment(segment)?;
            if i > 0 {
                joined.push(SEPARATOR);
            }
            joined.push_str(segment);
        }
        if joined.is_empty() {
            return Err(BusError::InvalidTopic(joined));
        }
        Ok(Self(joined))
    }

    /// Build `<kind>[:<scope>...]`.
    pub fn with_scope<S: AsRef<str>>(kind: &str, scope: &[S]) -> Result<Self> {
        Self::new(std::iter::once(kind).chain(scope.iter().map(AsRef::as_ref)))
    }

    /// Parse a topic string received off the wire.
    pub fn parse(topic: &str) -> Result<Self> {
        if topic.is_empty() {
            return Err(BusError::InvalidTopic(topic.to_string()));
        }
        if split_topic(topic).iter().any(|s| s.is_empty()) {
            return Err(BusError::InvalidTopic(topic.to_string()));
        }
        Ok(Self(topic.to_string()))
    }

    /// The event kind (first segment).
    pub fn kind(&self) -> &str {
        self.segments().next().unwrap_or_default()
    }

    /// Iterate the segments in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR)
    }

    /// The segment set used for intersection matching.
    pub fn segment_set(&self) -> BTreeSet<&str> {
        self.segments().collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Topic {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Topic {
    type Error = BusError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.0
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A subscription's required segment set.
///
/// A topic matches iff every required segment appears somewhere in the
/// topic, regardless of position or of any additional segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicFilter {
    required: BTreeSet<String>,
}

impl TopicFilter {
    /// A filter that accepts every topic.
    pub fn all() -> Self {
        Self::default()
    }

    /// Require all of the given segments.
    pub fn new<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut required = BTreeSet::new();
        for segment in segments {
            let segment = segment.as_ref();
            validate_segment(segment)?;
            required.insert(segment.to_string());
        }
        Ok(Self { required })
    }

    /// Require an event kind plus the given scope segments.
    pub fn for_kind<S: AsRef<str>>(kind: &str, scope: &[S]) -> Result<Self> {
        Self::new(std::iter::once(kind).chain(scope.iter().map(AsRef::as_ref)))
    }

    pub fn required(&self) -> &BTreeSet<String> {
        &self.required
    }

    /// Check a topic against the requirement set.
    pub fn matches(&self, topic: &Topic) -> bool {
        self.matches_str(topic.as_str())
    }

    /// Same as [`TopicFilter::matches`] on an unvalidated topic string.
    pub fn matches_str(&self, topic: &str) -> bool {
        if self.required.is_empty() {
            return true;
        }
        let present: BTreeSet<&str> = split_topic(topic).into_iter().collect();
        self.required.iter().all(|r| present.contains(r.as_str()))
    }
}
