//! Line-oriented text encoding.
//!
//! A packet is one line of space-separated tokens. The first token is the
//! command name, the rest are the fields in declaration order:
//!
//! - strings are escaped: `@` becomes `@@`, any char `<= 0x20` becomes
//!   `@<decimal code>@`
//! - byte arrays are standard base64
//! - booleans are `True` / `False`
//! - single bytes are uppercase hex without zero padding (`A`, `7F`)
//! - integers are decimal

use std::collections::VecDeque;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::core::packet::{CommandId, FieldReader, FieldWriter, Packet};
use crate::error::{ProtocolError, Result};

/// Escape a string so it contains no spaces, control characters or lone `@`.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '@' {
            out.push_str("@@");
        } else if c <= ' ' {
            out.push('@');
            out.push_str(&(c as u32).to_string());
            out.push('@');
        } else {
            out.push(c);
        }
    }
    out
}

/// Reverse [`escape`].
pub fn unescape(value: &str) -> Result<String> {
    if !value.contains('@') {
        return Ok(value.to_string());
    }

    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find('@') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after
            .find('@')
            .ok_or_else(|| ProtocolError::Malformed("invalid escape string detected".into()))?;
        if end == 0 {
            out.push('@');
        } else {
            let code: u32 = after[..end]
                .parse()
                .map_err(|_| ProtocolError::Malformed(format!("bad escape '{}'", &after[..end])))?;
            let c = char::from_u32(code)
                .ok_or_else(|| ProtocolError::Malformed(format!("bad escape code {code}")))?;
            out.push(c);
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Collects text tokens for one line.
#[derive(Debug, Default)]
pub struct TextWriter {
    parts: Vec<String>,
}

impl TextWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_line(self) -> String {
        self.parts.join(" ")
    }
}

impl FieldWriter for TextWriter {
    fn write_str(&mut self, value: &str) {
        self.parts.push(escape(value));
    }

    fn write_i32(&mut self, value: i32) {
        self.parts.push(value.to_string());
    }

    fn write_bool(&mut self, value: bool) {
        self.parts.push(if value { "True" } else { "False" }.to_string());
    }

    fn write_bytes(&mut self, value: &[u8]) {
        self.parts.push(STANDARD.encode(value));
    }

    fn write_u8(&mut self, value: u8) {
        self.parts.push(format!("{value:X}"));
    }
}

/// Consumes the tokens of one line.
#[derive(Debug)]
pub struct TextReader<'a> {
    tokens: VecDeque<&'a str>,
}

impl<'a> TextReader<'a> {
    pub fn new(line: &'a str) -> Self {
        Self {
            tokens: line.split(' ').collect(),
        }
    }

    fn next_token(&mut self) -> Result<&'a str> {
        self.tokens.pop_front().ok_or(ProtocolError::Truncated)
    }
}

impl FieldReader for TextReader<'_> {
    fn read_str(&mut self) -> Result<String> {
        unescape(self.next_token()?)
    }

    fn read_i32(&mut self) -> Result<i32> {
        let token = self.next_token()?;
        token
            .parse()
            .map_err(|_| ProtocolError::Malformed(format!("bad integer '{token}'")))
    }

    fn read_bool(&mut self) -> Result<bool> {
        let token = self.next_token()?;
        if token.eq_ignore_ascii_case("true") {
            Ok(true)
        } else if token.eq_ignore_ascii_case("false") {
            Ok(false)
        } else {
            Err(ProtocolError::Malformed(format!("bad boolean '{token}'")))
        }
    }

    fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let token = self.next_token()?;
        STANDARD
            .decode(token)
            .map_err(|e| ProtocolError::Malformed(format!("bad base64: {e}")))
    }

    fn read_u8(&mut self) -> Result<u8> {
        let token = self.next_token()?;
        if token.is_empty() || token.len() > 2 {
            return Err(ProtocolError::Malformed(format!("bad hex byte '{token}'")));
        }
        u8::from_str_radix(token, 16)
            .map_err(|_| ProtocolError::Malformed(format!("bad hex byte '{token}'")))
    }
}

/// Render a packet as one line, without the trailing newline.
pub fn encode_line(packet: &Packet) -> String {
    let mut writer = TextWriter::new();
    writer.write_str(packet.command().name());
    packet.write_fields(&mut writer);
    writer.into_line()
}

/// Parse one line (already stripped of its newline) into a packet.
pub fn decode_line(line: &str) -> Result<Packet> {
    let mut reader = TextReader::new(line);
    let command = CommandId::from_name(&reader.read_str()?)?;
    Packet::read_fields(command, &mut reader)
}
