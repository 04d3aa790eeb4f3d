//! Payload framing conventions.
//!
//! A framing turns one domain item into the payload frames of a
//! [`TopicMessage`](crate::TopicMessage) and back:
//!
//! - [`SingleJson`] - exactly one JSON frame per message
//! - [`JsonArray`] - one JSON frame per array element
//! - [`RawFrames`] - passthrough, no decoding

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

use crate::error::{BusError, Result};

/// Encoding/decoding of payload frames.
pub trait Framing: Send + Sync + 'static {
    type Item: Send + 'static;

    /// Encode an item into payload frames.
    fn encode(&self, item: &Self::Item) -> Result<Vec<Bytes>>;

    /// Decode payload frames into an item.
    fn decode(&self, frames: &[Bytes]) -> Result<Self::Item>;
}

/// One JSON object per message. Any other frame count is an error.
pub struct SingleJson<T>(PhantomData<fn() -> T>);

impl<T> SingleJson<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for SingleJson<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Framing for SingleJson<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Item = T;

    fn encode(&self, item: &T) -> Result<Vec<Bytes>> {
        let body = serde_json::to_vec(item).map_err(|e| BusError::Encode(e.to_string()))?;
        Ok(vec![Bytes::from(body)])
    }

    fn decode(&self, frames: &[Bytes]) -> Result<T> {
        let [frame] = frames else {
            return Err(BusError::FrameCount {
                expected: 1,
                actual: frames.len(),
            });
        };
        serde_json::from_slice(frame).map_err(|e| BusError::decode(e.to_string()))
    }
}

/// A list of items, one JSON frame per element.
pub struct JsonArray<T>(PhantomData<fn() -> T>);

impl<T> JsonArray<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonArray<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Framing for JsonArray<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Item = Vec<T>;

    fn encode(&self, items: &Vec<T>) -> Result<Vec<Bytes>> {
        items
            .iter()
            .map(|item| {
                serde_json::to_vec(item)
                    .map(Bytes::from)
                    .map_err(|e| BusError::Encode(e.to_string()))
            })
            .collect()
    }

    fn decode(&self, frames: &[Bytes]) -> Result<Vec<T>> {
        frames
            .iter()
            .enumerate()
            .map(|(i, frame)| {
                serde_json::from_slice(frame)
                    .map_err(|e| BusError::decode(format!("frame {i}: {e}")))
            })
            .collect()
    }
}

/// Passthrough framing for envelopes that carry already-serialized events.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawFrames;

impl Framing for RawFrames {
    type Item = Vec<Bytes>;

    fn encode(&self, frames: &Vec<Bytes>) -> Result<Vec<Bytes>> {
        Ok(frames.clone())
    }

    fn decode(&self, frames: &[Bytes]) -> Result<Vec<Bytes>> {
        Ok(frames.to_vec())
    }
}
