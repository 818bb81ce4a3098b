//! Tokio codecs for the two stream encodings, plus the datagram framing.
//!
//! ## Binary frame
//! ```text
//! [TotalLength(4, BE i32)] [Checksum(4, BE i32)] [Command(1)] [Payload(TotalLength - 1)]
//! ```
//! `TotalLength` counts the command byte and the payload only. The checksum
//! is the wrapping 32-bit sum of the command byte and every payload byte.
//!
//! ## Text frame
//! One UTF-8 line per packet, see [`crate::core::text`].
//!
//! ## Datagram frame
//! A binary frame without the length prefix; the datagram boundary delimits it.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::core::binary;
use crate::core::packet::Packet;
use crate::core::text;
use crate::error::{ProtocolError, Result};
use crate::transport::negotiate::TransportKind;

/// Largest frame accepted by the decoders (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length + checksum prefix of a binary stream frame.
const HEADER_LEN: usize = 8;

/// Wrapping byte sum of the command byte and payload.
pub fn checksum(command: u8, payload: &[u8]) -> i32 {
    payload
        .iter()
        .fold(i32::from(command), |acc, b| acc.wrapping_add(i32::from(*b)))
}

fn verify_and_decode(expected: i32, command: u8, payload: &[u8]) -> Result<Packet> {
    let actual = checksum(command, payload);
    if actual != expected {
        return Err(ProtocolError::ChecksumMismatch { expected, actual });
    }
    binary::decode_payload(command, payload)
}

/// Length-prefixed, checksummed binary framing.
#[derive(Debug, Clone)]
pub struct BinaryCodec {
    max_frame: usize,
}

impl Default for BinaryCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl BinaryCodec {
    pub fn new() -> Self {
        Self {
            max_frame: MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self { max_frame }
    }
}

impl Decoder for BinaryCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let total_len = i32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        if total_len < 1 {
            return Err(ProtocolError::InvalidLength(total_len));
        }
        let total_len = total_len as usize;
        if total_len > self.max_frame {
            return Err(ProtocolError::OversizedFrame(total_len));
        }

        if src.len() < HEADER_LEN + total_len {
            src.reserve(HEADER_LEN + total_len - src.len());
            return Ok(None);
        }

        src.advance(4);
        let expected = src.get_i32();
        let command = src.get_u8();
        let payload = src.split_to(total_len - 1);
        verify_and_decode(expected, command, &payload).map(Some)
    }
}

impl Encoder<Packet> for BinaryCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<()> {
        Encoder::<&Packet>::encode(self, &packet, dst)
    }
}

impl Encoder<&Packet> for BinaryCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: &Packet, dst: &mut BytesMut) -> Result<()> {
        let payload = binary::encode_payload(packet);
        let total_len = 1 + payload.len();
        if total_len > self.max_frame {
            return Err(ProtocolError::OversizedFrame(total_len));
        }
        let command = packet.command().code();

        dst.reserve(HEADER_LEN + total_len);
        dst.put_i32(total_len as i32);
        dst.put_i32(checksum(command, &payload));
        dst.put_u8(command);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

/// Newline-delimited text framing.
#[derive(Debug, Clone)]
pub struct TextCodec {
    lines: LinesCodec,
}

impl Default for TextCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl TextCodec {
    pub fn new() -> Self {
        Self::with_max_frame(MAX_FRAME_SIZE)
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_frame),
        }
    }
}

impl From<LinesCodecError> for ProtocolError {
    fn from(e: LinesCodecError) -> Self {
        match e {
            LinesCodecError::MaxLineLengthExceeded => ProtocolError::OversizedFrame(MAX_FRAME_SIZE),
            LinesCodecError::Io(e) => ProtocolError::Io(e),
        }
    }
}

impl Decoder for TextCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        match self.lines.decode(src)? {
            Some(line) => text::decode_line(&line).map(Some),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        match self.lines.decode_eof(src)? {
            Some(line) => text::decode_line(&line).map(Some),
            None => Ok(None),
        }
    }
}

impl Encoder<Packet> for TextCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<()> {
        Encoder::<&Packet>::encode(self, &packet, dst)
    }
}

impl Encoder<&Packet> for TextCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: &Packet, dst: &mut BytesMut) -> Result<()> {
        self.lines.encode(text::encode_line(packet), dst)?;
        Ok(())
    }
}

/// Codec for a stream whose encoding is chosen at runtime by the magic value.
///
/// Starts out `Pending` on the server side; every operation fails with
/// [`ProtocolError::NotNegotiated`] until it is replaced.
#[derive(Debug, Clone, Default)]
pub enum ChatCodec {
    #[default]
    Pending,
    Binary(BinaryCodec),
    Text(TextCodec),
}

impl ChatCodec {
    pub fn for_kind(kind: TransportKind) -> Self {
        match kind {
            TransportKind::Binary => ChatCodec::Binary(BinaryCodec::new()),
            TransportKind::Text => ChatCodec::Text(TextCodec::new()),
        }
    }

    pub fn kind(&self) -> Option<TransportKind> {
        match self {
            ChatCodec::Pending => None,
            ChatCodec::Binary(_) => Some(TransportKind::Binary),
            ChatCodec::Text(_) => Some(TransportKind::Text),
        }
    }
}

impl Decoder for ChatCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        match self {
            ChatCodec::Pending => Err(ProtocolError::NotNegotiated),
            ChatCodec::Binary(c) => c.decode(src),
            ChatCodec::Text(c) => c.decode(src),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        match self {
            ChatCodec::Pending => Err(ProtocolError::NotNegotiated),
            ChatCodec::Binary(c) => c.decode_eof(src),
            ChatCodec::Text(c) => c.decode_eof(src),
        }
    }
}

impl Encoder<&Packet> for ChatCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: &Packet, dst: &mut BytesMut) -> Result<()> {
        match self {
            ChatCodec::Pending => Err(ProtocolError::NotNegotiated),
            ChatCodec::Binary(c) => Encoder::<&Packet>::encode(c, packet, dst),
            ChatCodec::Text(c) => Encoder::<&Packet>::encode(c, packet, dst),
        }
    }
}

/// Encode a packet as a single UDP datagram.
pub fn encode_datagram(packet: &Packet) -> Bytes {
    let payload = binary::encode_payload(packet);
    let command = packet.command().code();
    let mut buf = BytesMut::with_capacity(5 + payload.len());
    buf.put_i32(checksum(command, &payload));
    buf.put_u8(command);
    buf.extend_from_slice(&payload);
    buf.freeze()
}

/// Decode a single UDP datagram.
pub fn decode_datagram(mut data: &[u8]) -> Result<Packet> {
    if data.len() < 4 {
        return Err(ProtocolError::Truncated);
    }
    if data.len() == 4 {
        return Err(ProtocolError::InvalidLength(0));
    }
    let expected = data.get_i32();
    let command = data.get_u8();
    verify_and_decode(expected, command, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(packet: &Packet) -> BytesMut {
        let mut buf = BytesMut::new();
        BinaryCodec::new().encode(packet, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_binary_frame_layout() {
        let buf = frame(&Packet::goodbye("ab"));
        // total = cmd + 4-byte len + 2 bytes
        assert_eq!(&buf[0..4], &7i32.to_be_bytes());
        let sum = 2 + 2 + u32::from(b'a') + u32::from(b'b');
        assert_eq!(&buf[4..8], &(sum as i32).to_be_bytes());
        assert_eq!(buf[8], 2);
        assert_eq!(buf.len(), 8 + 7);
    }

    #[test]
    fn test_checksum_wraps() {
        let payload = vec![0xff; 10_000_000];
        let expected = (0..10_000_000).fold(5i32, |acc, _| acc.wrapping_add(255));
        assert_eq!(checksum(5, &payload), expected);
    }

    #[test]
    fn test_partial_frames_wait_for_more_data() {
        let full = frame(&Packet::message("alice", "partial"));
        let mut codec = BinaryCodec::new();
        let mut buf = BytesMut::new();
        for (i, byte) in full.iter().enumerate() {
            buf.put_u8(*byte);
            let out = codec.decode(&mut buf).unwrap();
            if i + 1 < full.len() {
                assert!(out.is_none());
            } else {
                assert_eq!(out, Some(Packet::message("alice", "partial")));
            }
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let mut buf = frame(&Packet::Ping);
        buf.extend_from_slice(&frame(&Packet::GetUserList));
        let mut codec = BinaryCodec::new();
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Packet::Ping));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Packet::GetUserList));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let mut buf = frame(&Packet::message("alice", "tamper"));
        let last = buf.len() - 1;
        buf[last] ^= 0x01;
        let err = BinaryCodec::new().decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::ChecksumMismatch { .. }));
        assert!(err.is_framing());
    }

    #[test]
    fn test_zero_length_rejected() {
        let mut buf = BytesMut::from(&[0u8, 0, 0, 0, 0, 0, 0, 0][..]);
        assert!(matches!(
            BinaryCodec::new().decode(&mut buf),
            Err(ProtocolError::InvalidLength(0))
        ));

        let mut buf = BytesMut::from(&[0xffu8, 0xff, 0xff, 0xff, 0, 0, 0, 0][..]);
        assert!(matches!(
            BinaryCodec::new().decode(&mut buf),
            Err(ProtocolError::InvalidLength(-1))
        ));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut buf = BytesMut::new();
        buf.put_i32(1024);
        buf.put_i32(0);
        let mut codec = BinaryCodec::with_max_frame(512);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::OversizedFrame(1024))
        ));
    }

    #[test]
    fn test_text_codec_lines() {
        let mut codec = TextCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(&Packet::message("bob", "two words"), &mut buf).unwrap();
        assert_eq!(&buf[..], b"Message bob two@32@words\n");

        let mut input = BytesMut::from(&b"Ping\r\nGoodbye bye\n"[..]);
        assert_eq!(codec.decode(&mut input).unwrap(), Some(Packet::Ping));
        assert_eq!(codec.decode(&mut input).unwrap(), Some(Packet::goodbye("bye")));
        assert_eq!(codec.decode(&mut input).unwrap(), None);
    }

    #[test]
    fn test_pending_codec_refuses() {
        let mut codec = ChatCodec::default();
        let mut buf = BytesMut::new();
        assert!(matches!(
            codec.encode(&Packet::Ping, &mut buf),
            Err(ProtocolError::NotNegotiated)
        ));
        assert_eq!(codec.kind(), None);
        assert_eq!(
            ChatCodec::for_kind(TransportKind::Text).kind(),
            Some(TransportKind::Text)
        );
    }

    #[test]
    fn test_datagram_roundtrip_and_layout() {
        let packet = Packet::message("u", "m");
        let data = encode_datagram(&packet);
        assert_eq!(data[4], 3);
        assert_eq!(data.len(), 4 + 1 + 5 + 5);
        assert_eq!(decode_datagram(&data).unwrap(), packet);

        let ping = encode_datagram(&Packet::Ping);
        assert_eq!(&ping[..], &[0, 0, 0, 8, 8]);
    }

    #[test]
    fn test_datagram_errors() {
        assert!(matches!(decode_datagram(&[1, 2]), Err(ProtocolError::Truncated)));
        assert!(matches!(
            decode_datagram(&[0, 0, 0, 0]),
            Err(ProtocolError::InvalidLength(0))
        ));
        assert!(matches!(
            decode_datagram(&[0, 0, 0, 9, 8]),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }
}
