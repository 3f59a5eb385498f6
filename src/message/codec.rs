//! # Wire framing for transported messages.
//!
//! Every message crossing a transport is framed as:
//!
//! ```text
//! ┌──────────────┬─────────┬────────┬─────────┬────────┬───────┬─────────┐
//! │ length (u32) │ t_len u8│ topic  │ c_len u8│ corr   │ flags │ payload │
//! │ big-endian   │         │ t_len B│         │ c_len B│ u8    │ rest    │
//! └──────────────┴─────────┴────────┴─────────┴────────┴───────┴─────────┘
//!   length = number of bytes after the length field
//! ```
//!
//! The flags byte carries [`Flags`] in its low bits and the `Text` kind in bit 7.
//! A zero `t_len`/`c_len` means "absent". Stream transports drive [`MessageCodec`]
//! through `tokio_util::codec::Framed`; datagram transports call
//! [`encode_frame`]/[`decode_frame`] directly.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::TransportError;
use crate::message::{Flags, Message, MessageKind};

/// Size of the length prefix.
pub const LEN_PREFIX: usize = 4;

/// Bit 7 of the flags byte: payload is text.
const KIND_TEXT: u8 = 0x80;

/// Smallest body: two length bytes and the flags byte.
const MIN_BODY: usize = 3;

/// Length-prefixed message codec.
#[derive(Clone, Copy, Debug)]
pub struct MessageCodec {
    max_frame_len: usize,
}

impl MessageCodec {
    /// Creates a codec rejecting bodies larger than `max_frame_len` bytes.
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            max_frame_len: max_frame_len.max(MIN_BODY),
        }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_FRAME_LEN)
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, TransportError> {
        decode_frame(src, self.max_frame_len)
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = TransportError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), TransportError> {
        encode_frame(&msg, dst)
    }
}

impl Encoder<&Message> for MessageCodec {
    type Error = TransportError;

    fn encode(&mut self, msg: &Message, dst: &mut BytesMut) -> Result<(), TransportError> {
        encode_frame(msg, dst)
    }
}

/// Checks that a message fits the framing limits without encoding it.
pub fn validate(msg: &Message) -> Result<(), TransportError> {
    short_field("topic", msg.topic())?;
    short_field("correlation id", msg.correlation_id())?;
    Ok(())
}

/// Appends one framed message to `dst`.
pub fn encode_frame(msg: &Message, dst: &mut BytesMut) -> Result<(), TransportError> {
    let topic = short_field("topic", msg.topic())?;
    let corr = short_field("correlation id", msg.correlation_id())?;

    let body = 1 + topic.len() + 1 + corr.len() + 1 + msg.payload().len();
    let len = u32::try_from(body)
        .map_err(|_| TransportError::Frame(format!("message of {body} bytes too large")))?;

    dst.reserve(LEN_PREFIX + body);
    dst.put_u32(len);
    dst.put_u8(topic.len() as u8);
    dst.put_slice(topic);
    dst.put_u8(corr.len() as u8);
    dst.put_slice(corr);
    dst.put_u8(flags_byte(msg));
    dst.put_slice(msg.payload());
    Ok(())
}

/// Number of bytes `msg` occupies on the wire, length prefix included.
pub fn frame_len(msg: &Message) -> usize {
    let topic = msg.topic().map_or(0, str::len);
    let corr = msg.correlation_id().map_or(0, str::len);
    LEN_PREFIX + 1 + topic + 1 + corr + 1 + msg.len()
}

/// Encodes one message into a fresh buffer.
pub fn to_bytes(msg: &Message) -> Result<Bytes, TransportError> {
    let mut buf = BytesMut::new();
    encode_frame(msg, &mut buf)?;
    Ok(buf.freeze())
}

/// Takes one complete frame off the front of `src`.
///
/// Returns `Ok(None)` when more bytes are needed.
pub fn decode_frame(src: &mut BytesMut, max_frame_len: usize) -> Result<Option<Message>, TransportError> {
    if src.len() < LEN_PREFIX {
        return Ok(None);
    }
    let mut len_bytes = [0u8; LEN_PREFIX];
    len_bytes.copy_from_slice(&src[..LEN_PREFIX]);
    let body = u32::from_be_bytes(len_bytes) as usize;

    if body < MIN_BODY {
        return Err(TransportError::Frame(format!("frame body of {body} bytes is truncated")));
    }
    if body > max_frame_len {
        return Err(TransportError::Frame(format!(
            "frame body of {body} bytes exceeds limit {max_frame_len}"
        )));
    }
    if src.len() < LEN_PREFIX + body {
        src.reserve(LEN_PREFIX + body - src.len());
        return Ok(None);
    }

    src.advance(LEN_PREFIX);
    let body = src.split_to(body).freeze();
    decode_body(body).map(Some)
}

/// Parses a frame body (everything after the length prefix).
pub fn decode_body(mut body: Bytes) -> Result<Message, TransportError> {
    let topic = take_short(&mut body, "topic")?;
    let corr = take_short(&mut body, "correlation id")?;
    if !body.has_remaining() {
        return Err(TransportError::Frame("missing flags byte".into()));
    }
    let raw = body.get_u8();

    let kind = if raw & KIND_TEXT != 0 {
        MessageKind::Text
    } else {
        MessageKind::Bytes
    };
    let mut msg = Message::from_parts(kind, body).with_flags(Flags::from_bits_truncate(raw));
    if let Some(topic) = topic {
        msg = msg.with_topic(topic);
    }
    if let Some(corr) = corr {
        msg = msg.with_correlation_id(corr);
    }
    Ok(msg)
}

fn flags_byte(msg: &Message) -> u8 {
    let kind = match msg.kind() {
        MessageKind::Text => KIND_TEXT,
        MessageKind::Bytes => 0,
    };
    msg.flags().bits() | kind
}

fn short_field<'a>(what: &str, value: Option<&'a str>) -> Result<&'a [u8], TransportError> {
    let bytes = value.map(str::as_bytes).unwrap_or_default();
    if bytes.len() > u8::MAX as usize {
        return Err(TransportError::Frame(format!(
            "{what} of {} bytes exceeds 255",
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn take_short(body: &mut Bytes, what: &str) -> Result<Option<String>, TransportError> {
    if !body.has_remaining() {
        return Err(TransportError::Frame(format!("missing {what} length")));
    }
    let len = body.get_u8() as usize;
    if body.remaining() < len {
        return Err(TransportError::Frame(format!("{what} truncated")));
    }
    if len == 0 {
        return Ok(None);
    }
    let raw = body.split_to(len);
    String::from_utf8(raw.to_vec())
        .map(Some)
        .map_err(|_| TransportError::Frame(format!("{what} is not valid UTF-8")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout_matches_wire_format() {
        let msg = Message::new(Bytes::from_static(b"xyz"))
            .with_topic("ab")
            .with_correlation_id("c")
            .with_flags(Flags::MORE);
        let bytes = to_bytes(&msg).unwrap();

        assert_eq!(
            &bytes[..],
            &[0, 0, 0, 9, 2, b'a', b'b', 1, b'c', 0x04, b'x', b'y', b'z']
        );
        assert_eq!(frame_len(&msg), bytes.len());
    }

    #[test]
    fn text_kind_survives_the_wire() {
        let msg = Message::text("héllo").with_topic("greet");
        let mut buf = BytesMut::new();
        encode_frame(&msg, &mut buf).unwrap();

        let decoded = decode_frame(&mut buf, 1024).unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.as_text(), Some("héllo"));
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frames_wait_for_more_bytes() {
        let mut codec = MessageCodec::new(1024);
        let full = to_bytes(&Message::text("split me")).unwrap();

        let mut buf = BytesMut::from(&full[..6]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&full[6..]);
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.as_text(), Some("split me"));
    }

    #[test]
    fn back_to_back_frames_decode_in_order() {
        let mut codec = MessageCodec::new(1024);
        let mut buf = BytesMut::new();
        for i in 0..3 {
            codec.encode(Message::text(format!("m{i}")), &mut buf).unwrap();
        }
        for i in 0..3 {
            let msg = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(msg.as_text(), Some(format!("m{i}").as_str()));
        }
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn oversized_topic_is_rejected() {
        let msg = Message::text("x").with_topic("t".repeat(256));
        assert!(matches!(validate(&msg), Err(TransportError::Frame(_))));
        assert!(encode_frame(&msg, &mut BytesMut::new()).is_err());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let bytes = to_bytes(&Message::new(vec![0u8; 64])).unwrap();
        let mut buf = BytesMut::from(&bytes[..]);
        assert!(matches!(decode_frame(&mut buf, 16), Err(TransportError::Frame(_))));
    }
}
