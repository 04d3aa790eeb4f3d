//! Messages carried by the bus.

use bytes::Bytes;

use crate::topic::Topic;

/// A topic plus its ordered payload frames.
///
/// On the wire this is one multi-frame message: frame 0 is the topic
/// string, frames 1..N are the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMessage {
    pub topic: Topic,
    pub frames: Vec<Bytes>,
}

impl TopicMessage {
    pub fn new(topic: Topic, frames: Vec<Bytes>) -> Self {
        Self { topic, frames }
    }

    /// Number of payload frames (the topic frame is not counted).
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn into_parts(self) -> (Topic, Vec<Bytes>) {
        (self.topic, self.frames)
    }
}
