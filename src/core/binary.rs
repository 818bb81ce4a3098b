//! Binary field encoding.
//!
//! Strings and byte arrays are prefixed with a signed 32-bit big-endian byte
//! count, integers are 32-bit big-endian, booleans one byte (0/1) and bytes
//! are written as-is.

use bytes::{Buf, BufMut, BytesMut};

use crate::core::packet::{CommandId, FieldReader, FieldWriter, Packet};
use crate::error::{ProtocolError, Result};

/// Accumulates binary fields into a buffer.
#[derive(Debug, Default)]
pub struct BinaryWriter {
    buf: BytesMut,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_inner(self) -> BytesMut {
        self.buf
    }

    fn put_len_prefixed(&mut self, data: &[u8]) {
        self.buf.put_i32(data.len() as i32);
        self.buf.put_slice(data);
    }
}

impl FieldWriter for BinaryWriter {
    fn write_str(&mut self, value: &str) {
        self.put_len_prefixed(value.as_bytes());
    }

    fn write_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    fn write_bytes(&mut self, value: &[u8]) {
        self.put_len_prefixed(value);
    }

    fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }
}

/// Reads binary fields from a payload slice.
///
/// Every read checks the remaining length first, so truncated input yields
/// [`ProtocolError::Truncated`] instead of panicking.
#[derive(Debug)]
pub struct BinaryReader<'a> {
    data: &'a [u8],
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn remaining(&self) -> usize {
        self.data.remaining()
    }

    fn need(&self, len: usize) -> Result<()> {
        if self.data.remaining() < len {
            return Err(ProtocolError::Truncated);
        }
        Ok(())
    }

    fn take_len_prefixed(&mut self) -> Result<&'a [u8]> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(ProtocolError::Malformed(format!("negative length {len}")));
        }
        let len = len as usize;
        self.need(len)?;
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }
}

impl FieldReader for BinaryReader<'_> {
    fn read_str(&mut self) -> Result<String> {
        let raw = self.take_len_prefixed()?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| ProtocolError::Malformed(format!("invalid UTF-8 string: {e}")))
    }

    fn read_i32(&mut self) -> Result<i32> {
        self.need(4)?;
        Ok(self.data.get_i32())
    }

    fn read_bool(&mut self) -> Result<bool> {
        self.need(1)?;
        Ok(self.data.get_u8() != 0)
    }

    fn read_bytes(&mut self) -> Result<Vec<u8>> {
        Ok(self.take_len_prefixed()?.to_vec())
    }

    fn read_u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.data.get_u8())
    }
}

/// Encode the payload (fields only, no command byte) of a packet.
pub fn encode_payload(packet: &Packet) -> BytesMut {
    let mut writer = BinaryWriter::new();
    packet.write_fields(&mut writer);
    writer.into_inner()
}

/// Decode a packet from its command byte and payload.
pub fn decode_payload(command: u8, payload: &[u8]) -> Result<Packet> {
    let command = CommandId::from_code(i64::from(command))?;
    Packet::read_fields(command, &mut BinaryReader::new(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::UserListEntry;

    #[test]
    fn test_string_layout() {
        let bytes = encode_payload(&Packet::goodbye("bye"));
        assert_eq!(&bytes[..], &[0, 0, 0, 3, b'b', b'y', b'e']);
    }

    #[test]
    fn test_hello_without_upgrade_omits_key() {
        let bytes = encode_payload(&Packet::hello("a", "b", false));
        // two 1-char strings + bool
        assert_eq!(bytes.len(), 5 + 5 + 1);
        assert_eq!(*bytes.last().unwrap(), 0);

        let bytes = encode_payload(&Packet::Hello {
            username: "a".into(),
            hostname: "b".into(),
            xor_key: Some(0x7f),
        });
        assert_eq!(&bytes[bytes.len() - 2..], &[1, 0x7f]);
    }

    #[test]
    fn test_target_writes_inner_code() {
        let bytes = encode_payload(&Packet::target("b", Packet::Ping));
        assert_eq!(&bytes[..], &[0, 0, 0, 1, b'b', 0, 0, 0, 8]);
    }

    #[test]
    fn test_every_variant_roundtrips() {
        let packets = vec![
            Packet::hello("alice", "host-a", true),
            Packet::hello("alice", "host-a", false),
            Packet::ReKey { xor_key: 0xA5 },
            Packet::goodbye(""),
            Packet::message("bob", "hello world"),
            Packet::SendFile {
                username: "bob".into(),
                filename: "notes.txt".into(),
                data: vec![0, 1, 2, 255],
            },
            Packet::target("carol", Packet::target("dave", Packet::message("x", "y"))),
            Packet::GetUserList,
            Packet::UserList {
                entries: vec![UserListEntry::new("a", "h1"), UserListEntry::new("b", "h2")],
            },
            Packet::Ping,
        ];

        for packet in packets {
            let payload = encode_payload(&packet);
            let decoded = decode_payload(packet.command().code(), &payload).unwrap();
            assert_eq!(decoded, packet);
        }
    }

    #[test]
    fn test_truncated_payload() {
        let payload = encode_payload(&Packet::message("bob", "hello"));
        let result = decode_payload(CommandId::Message.code(), &payload[..payload.len() - 1]);
        assert!(matches!(result, Err(ProtocolError::Truncated)));
    }

    #[test]
    fn test_negative_string_length() {
        let payload = [0xff, 0xff, 0xff, 0xff];
        let result = decode_payload(CommandId::Goodbye.code(), &payload);
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_unknown_inner_command() {
        let payload = [0, 0, 0, 0, 0, 0, 0, 42];
        let result = decode_payload(CommandId::Target.code(), &payload);
        assert!(matches!(result, Err(ProtocolError::UnknownCommand(42))));
    }

    #[test]
    fn test_deep_nesting_rejected() {
        let mut packet = Packet::Ping;
        for _ in 0..40 {
            packet = Packet::target("x", packet);
        }
        let payload = encode_payload(&packet);
        let result = decode_payload(CommandId::Target.code(), &payload);
        assert!(matches!(result, Err(ProtocolError::NestingTooDeep(_))));
    }
}
