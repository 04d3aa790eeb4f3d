//! Connection engine settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings shared by every [`Connection`](crate::Connection).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Inbound messages buffered per listener before it starts lagging.
    pub channel_capacity: usize,
    /// Outbound writes queued ahead of the transport.
    pub write_queue: usize,
    /// Per-step handshake deadline. `None` waits for as long as the
    /// transport stays up.
    #[serde(with = "optional_ms")]
    pub handshake_timeout: Option<Duration>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            write_queue: 256,
            handshake_timeout: None,
        }
    }
}

impl LinkConfig {
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }
}

mod optional_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
