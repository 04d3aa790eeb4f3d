//! Bus configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::codec::DEFAULT_MAX_FRAME_SIZE;

/// Default distribution endpoint.
pub const DEFAULT_ENDPOINT: &str = "127.0.0.1:5563";

/// Settings shared by every publisher, subscriber and hub of one bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Address of the distribution hub.
    pub endpoint: String,
    /// Capacity of each subscriber's fan-out channel. Slow listeners that
    /// fall further behind than this lose the oldest messages.
    pub channel_capacity: usize,
    /// How long `disconnect()` may spend flushing queued output.
    /// `None` waits indefinitely, zero drops pending data immediately.
    #[serde(with = "linger_ms")]
    pub linger: Option<Duration>,
    /// Largest accepted frame in bytes.
    pub max_frame_size: usize,
    /// Per-peer outbound queue length inside the hub.
    pub peer_queue: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            channel_capacity: 1024,
            linger: Some(Duration::from_millis(1000)),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            peer_queue: 1024,
        }
    }
}

impl BusConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }
}

/// `linger` is written as milliseconds; a negative value means "forever".
mod linger_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_i64(d.as_millis() as i64),
            None => s.serialize_i64(-1),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let ms = i64::deserialize(d)?;
        Ok((ms >= 0).then(|| Duration::from_millis(ms as u64)))
    }
}
