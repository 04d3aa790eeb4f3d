//! Wire codec for the bus transport.
//!
//! Every packet starts with a one-byte kind:
//!
//! ```text
//! 0x01 SUBSCRIBE    u32 len | prefix
//! 0x02 UNSUBSCRIBE  u32 len | prefix
//! 0x03 PUBLISH      u32 frame_count | (u32 len | bytes) * frame_count
//! 0x04 SUBSCRIBED   u32 len | prefix
//! 0x05 UNSUBSCRIBED u32 len | prefix
//! ```
//!
//! All integers are big-endian. For PUBLISH, frame 0 is the topic string.
//! SUBSCRIBED and UNSUBSCRIBED are sent by the hub once it applied the
//! matching request.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{BusError, Result};
use crate::message::TopicMessage;
use crate::topic::Topic;

/// Default upper bound for a single frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Upper bound on frames per message, to reject garbage headers early.
const MAX_FRAMES: usize = 4096;

mod kind {
    pub const SUBSCRIBE: u8 = 0x01;
    pub const UNSUBSCRIBE: u8 = 0x02;
    pub const PUBLISH: u8 = 0x03;
    pub const SUBSCRIBED: u8 = 0x04;
    pub const UNSUBSCRIBED: u8 = 0x05;
}

/// A single packet exchanged with the distribution hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Register interest in topics starting with the prefix.
    Subscribe(String),
    /// Drop a previously registered prefix.
    Unsubscribe(String),
    /// A topic message.
    Publish(TopicMessage),
    /// The hub now routes topics under the prefix to this peer.
    Subscribed(String),
    /// The hub no longer routes topics under the prefix to this peer.
    Unsubscribed(String),
}

/// Length-prefixed multi-frame codec.
#[derive(Debug, Clone, Copy)]
pub struct BusCodec {
    max_frame_size: usize,
}

impl BusCodec {
    /// Lengths travel as `u32`, so the limit is clamped to `u32::MAX`.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(u32::MAX as usize),
        }
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.max_frame_size {
            return Err(BusError::FrameTooLarge {
                size,
                limit: self.max_frame_size,
            });
        }
        Ok(())
    }

    fn put_prefix(&self, kind: u8, prefix: &str, dst: &mut BytesMut) -> Result<()> {
        self.check_size(prefix.len())?;
        dst.reserve(5 + prefix.len());
        dst.put_u8(kind);
        dst.put_u32(prefix.len() as u32);
        dst.put_slice(prefix.as_bytes());
        Ok(())
    }

    /// Total length of the packet at the head of `src`, if fully buffered.
    fn packet_len(&self, src: &[u8]) -> Result<Option<usize>> {
        let Some(&kind) = src.first() else {
            return Ok(None);
        };
        let mut cursor = &src[1..];
        match kind {
            kind::SUBSCRIBE | kind::UNSUBSCRIBE | kind::SUBSCRIBED | kind::UNSUBSCRIBED => {
                if cursor.len() < 4 {
                    return Ok(None);
                }
                let len = cursor.get_u32() as usize;
                self.check_size(len)?;
                let total = 1 + 4 + len;
                Ok((src.len() >= total).then_some(total))
            }
            kind::PUBLISH => {
                if cursor.len() < 4 {
                    return Ok(None);
                }
                let count = cursor.get_u32() as usize;
                if count == 0 || count > MAX_FRAMES {
                    return Err(BusError::decode(format!("invalid frame count {count}")));
                }
                let mut total = 1 + 4;
                for _ in 0..count {
                    if cursor.len() < 4 {
                        return Ok(None);
                    }
                    let len = cursor.get_u32() as usize;
                    self.check_size(len)?;
                    if cursor.len() < len {
                        return Ok(None);
                    }
                    cursor.advance(len);
                    total += 4 + len;
                }
                Ok(Some(total))
            }
            other => Err(BusError::decode(format!("unknown packet kind 0x{other:02x}"))),
        }
    }
}

impl Default for BusCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

fn read_string(buf: &mut BytesMut) -> Result<String> {
    let len = buf.get_u32() as usize;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|e| BusError::decode(e.to_string()))
}

impl Decoder for BusCodec {
    type Item = Packet;
    type Error = BusError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        let Some(total) = self.packet_len(src)? else {
            return Ok(None);
        };
        let mut packet = src.split_to(total);
        let kind = packet.get_u8();

        let decoded = match kind {
            kind::SUBSCRIBE => Packet::Subscribe(read_string(&mut packet)?),
            kind::UNSUBSCRIBE => Packet::Unsubscribe(read_string(&mut packet)?),
            kind::SUBSCRIBED => Packet::Subscribed(read_string(&mut packet)?),
            kind::UNSUBSCRIBED => Packet::Unsubscribed(read_string(&mut packet)?),
            _ => {
                let count = packet.get_u32() as usize;
                let topic = Topic::parse(&read_string(&mut packet)?)?;
                let mut frames = Vec::with_capacity(count - 1);
                for _ in 1..count {
                    let len = packet.get_u32() as usize;
                    frames.push(packet.split_to(len).freeze());
                }
                Packet::Publish(TopicMessage::new(topic, frames))
            }
        };
        Ok(Some(decoded))
    }
}

impl Encoder<Packet> for BusCodec {
    type Error = BusError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<()> {
        match packet {
            Packet::Subscribe(prefix) => self.put_prefix(kind::SUBSCRIBE, &prefix, dst),
            Packet::Unsubscribe(prefix) => self.put_prefix(kind::UNSUBSCRIBE, &prefix, dst),
            Packet::Subscribed(prefix) => self.put_prefix(kind::SUBSCRIBED, &prefix, dst),
            Packet::Unsubscribed(prefix) => self.put_prefix(kind::UNSUBSCRIBED, &prefix, dst),
            Packet::Publish(message) => {
                let topic = Bytes::copy_from_slice(message.topic.as_str().as_bytes());
                let count = 1 + message.frames.len();
                if count > MAX_FRAMES {
                    return Err(BusError::Encode(format!("too many frames ({count})")));
                }
                self.check_size(topic.len())?;
                for frame in &message.frames {
                    self.check_size(frame.len())?;
                }

                let payload: usize = message.frames.iter().map(|f| 4 + f.len()).sum();
                dst.reserve(1 + 4 + 4 + topic.len() + payload);
                dst.put_u8(kind::PUBLISH);
                dst.put_u32(count as u32);
                dst.put_u32(topic.len() as u32);
                dst.put_slice(&topic);
                for frame in &message.frames {
                    dst.put_u32(frame.len() as u32);
                    dst.put_slice(frame);
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish(topic: &str, frames: &[&'static [u8]]) -> Packet {
        Packet::Publish(TopicMessage::new(
            Topic::parse(topic).unwrap(),
            frames.iter().map(|f| Bytes::from_static(f)).collect(),
        ))
    }

    #[test]
    fn test_publish_layout() {
        let mut codec = BusCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(publish("a:b", &[b"xy"]), &mut buf).unwrap();

        assert_eq!(
            &buf[..],
            &[3, 0, 0, 0, 2, 0, 0, 0, 3, b'a', b':', b'b', 0, 0, 0, 2, b'x', b'y']
        );
    }

    #[test]
    fn test_partial_input_waits_for_more() {
        let mut codec = BusCodec::default();
        let mut full = BytesMut::new();
        codec
            .encode(publish("cheer:user42", &[b"{}", b"[]"]), &mut full)
            .unwrap();

        let mut partial = BytesMut::new();
        for (i, byte) in full.iter().enumerate() {
            partial.put_u8(*byte);
            let decoded = codec.decode(&mut partial).unwrap();
            if i + 1 < full.len() {
                assert!(decoded.is_none(), "decoded early at byte {i}");
            } else {
                assert_eq!(decoded, Some(publish("cheer:user42", &[b"{}", b"[]"])));
            }
        }
        assert!(partial.is_empty());
    }

    #[test]
    fn test_multiple_packets_in_one_buffer() {
        let mut codec = BusCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(Packet::Subscribe("cheer".into()), &mut buf).unwrap();
        codec.encode(Packet::Unsubscribe("".into()), &mut buf).unwrap();
        codec.encode(publish("cheer", &[]), &mut buf).unwrap();

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Packet::Subscribe("cheer".into()))
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Packet::Unsubscribe(String::new()))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(publish("cheer", &[])));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_acknowledgements_decode() {
        let mut codec = BusCodec::default();
        let mut buf = BytesMut::from(&[4, 0, 0, 0, 5, b'c', b'h', b'e', b'e', b'r', 5, 0, 0, 0, 0][..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Packet::Subscribed("cheer".into()))
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Packet::Unsubscribed(String::new()))
        );
        assert!(buf.is_empty());
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_frame_limit_clamped_to_wire_width() {
        let codec = BusCodec::new(usize::MAX);
        assert_eq!(codec.max_frame_size, u32::MAX as usize);
        assert!(matches!(
            codec.check_size(u32::MAX as usize + 1),
            Err(BusError::FrameTooLarge { .. })
        ));
        assert!(codec.check_size(u32::MAX as usize).is_ok());
    }

    #[test]
    fn test_unknown_kind_is_error() {
        let mut codec = BusCodec::default();
        let mut buf = BytesMut::from(&[0x7f, 0, 0][..]);
        assert!(matches!(codec.decode(&mut buf), Err(BusError::Decode(_))));
    }

    #[test]
    fn test_zero_frames_rejected() {
        let mut codec = BusCodec::default();
        let mut buf = BytesMut::from(&[3, 0, 0, 0, 0][..]);
        assert!(matches!(codec.decode(&mut buf), Err(BusError::Decode(_))));
    }

    #[test]
    fn test_frame_size_limit() {
        let mut codec = BusCodec::new(4);
        let mut buf = BytesMut::new();
        let err = codec
            .encode(publish("a", &[b"too long"]), &mut buf)
            .unwrap_err();
        assert!(matches!(err, BusError::FrameTooLarge { size: 8, limit: 4 }));

        let mut incoming = BytesMut::from(&[1, 0, 0, 1, 0][..]);
        assert!(matches!(
            codec.decode(&mut incoming),
            Err(BusError::FrameTooLarge { .. })
        ));
    }
}
