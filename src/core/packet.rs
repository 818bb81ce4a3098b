//! Packet model shared by both wire encodings.
//!
//! A [`Packet`] is a closed sum over the chat commands. The field layout of
//! each variant is written once, against the [`FieldWriter`] / [`FieldReader`]
//! traits, and the binary and text encodings provide the primitive formats.

use crate::error::{ProtocolError, Result};

/// Maximum depth of nested `Target` packets accepted on decode.
pub const MAX_TARGET_DEPTH: usize = 32;

/// Command codes as they appear on the wire.
///
/// The binary encoding carries the numeric code, the text encoding the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandId {
    Hello = 0,
    ReKey = 1,
    Goodbye = 2,
    Message = 3,
    SendFile = 4,
    Target = 5,
    GetUserList = 6,
    UserList = 7,
    Ping = 8,
}

impl CommandId {
    const ALL: [CommandId; 9] = [
        CommandId::Hello,
        CommandId::ReKey,
        CommandId::Goodbye,
        CommandId::Message,
        CommandId::SendFile,
        CommandId::Target,
        CommandId::GetUserList,
        CommandId::UserList,
        CommandId::Ping,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: i64) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| i64::from(c.code()) == code)
            .ok_or(ProtocolError::UnknownCommand(code))
    }

    pub fn name(self) -> &'static str {
        match self {
            CommandId::Hello => "Hello",
            CommandId::ReKey => "ReKey",
            CommandId::Goodbye => "Goodbye",
            CommandId::Message => "Message",
            CommandId::SendFile => "SendFile",
            CommandId::Target => "Target",
            CommandId::GetUserList => "GetUserList",
            CommandId::UserList => "UserList",
            CommandId::Ping => "Ping",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.name() == name)
            .ok_or_else(|| ProtocolError::UnknownCommandName(name.to_string()))
    }
}

/// One row of a `UserList` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserListEntry {
    pub username: String,
    pub hostname: String,
}

impl UserListEntry {
    pub fn new(username: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            hostname: hostname.into(),
        }
    }
}

/// A decoded chat packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// First packet a client sends. `xor_key` is present only when the client
    /// supports the cipher upgrade.
    Hello {
        username: String,
        hostname: String,
        xor_key: Option<u8>,
    },
    ReKey {
        xor_key: u8,
    },
    Goodbye {
        message: String,
    },
    Message {
        username: String,
        message: String,
    },
    SendFile {
        username: String,
        filename: String,
        data: Vec<u8>,
    },
    /// Wraps another packet for delivery to a single user.
    Target {
        destination: String,
        packet: Box<Packet>,
    },
    GetUserList,
    UserList {
        entries: Vec<UserListEntry>,
    },
    Ping,
}

impl Packet {
    pub fn hello(
        username: impl Into<String>,
        hostname: impl Into<String>,
        supports_upgrade: bool,
    ) -> Self {
        Packet::Hello {
            username: username.into(),
            hostname: hostname.into(),
            xor_key: supports_upgrade.then_some(0),
        }
    }

    pub fn message(username: impl Into<String>, message: impl Into<String>) -> Self {
        Packet::Message {
            username: username.into(),
            message: message.into(),
        }
    }

    pub fn goodbye(message: impl Into<String>) -> Self {
        Packet::Goodbye {
            message: message.into(),
        }
    }

    pub fn target(destination: impl Into<String>, packet: Packet) -> Self {
        Packet::Target {
            destination: destination.into(),
            packet: Box::new(packet),
        }
    }

    pub fn command(&self) -> CommandId {
        match self {
            Packet::Hello { .. } => CommandId::Hello,
            Packet::ReKey { .. } => CommandId::ReKey,
            Packet::Goodbye { .. } => CommandId::Goodbye,
            Packet::Message { .. } => CommandId::Message,
            Packet::SendFile { .. } => CommandId::SendFile,
            Packet::Target { .. } => CommandId::Target,
            Packet::GetUserList => CommandId::GetUserList,
            Packet::UserList { .. } => CommandId::UserList,
            Packet::Ping => CommandId::Ping,
        }
    }

    /// Write this packet's fields (not its command) in declaration order.
    pub fn write_fields<W: FieldWriter>(&self, w: &mut W) {
        match self {
            Packet::Hello {
                username,
                hostname,
                xor_key,
            } => {
                w.write_str(username);
                w.write_str(hostname);
                w.write_bool(xor_key.is_some());
                if let Some(key) = xor_key {
                    w.write_u8(*key);
                }
            }
            Packet::ReKey { xor_key } => w.write_u8(*xor_key),
            Packet::Goodbye { message } => w.write_str(message),
            Packet::Message { username, message } => {
                w.write_str(username);
                w.write_str(message);
            }
            Packet::SendFile {
                username,
                filename,
                data,
            } => {
                w.write_str(username);
                w.write_str(filename);
                w.write_bytes(data);
            }
            Packet::Target {
                destination,
                packet,
            } => {
                w.write_str(destination);
                w.write_i32(i32::from(packet.command().code()));
                packet.write_fields(w);
            }
            Packet::GetUserList | Packet::Ping => {}
            Packet::UserList { entries } => {
                // Counts beyond i32 cannot be represented on the wire.
                w.write_i32(entries.len().min(i32::MAX as usize) as i32);
                for entry in entries.iter().take(i32::MAX as usize) {
                    w.write_str(&entry.username);
                    w.write_str(&entry.hostname);
                }
            }
        }
    }

    /// Read the fields of a packet whose command has already been decoded.
    pub fn read_fields<R: FieldReader>(command: CommandId, r: &mut R) -> Result<Self> {
        Self::read_nested(command, r, 0)
    }

    fn read_nested<R: FieldReader>(command: CommandId, r: &mut R, depth: usize) -> Result<Self> {
        let packet = match command {
            CommandId::Hello => {
                let username = r.read_str()?;
                let hostname = r.read_str()?;
                let xor_key = if r.read_bool()? {
                    Some(r.read_u8()?)
                } else {
                    None
                };
                Packet::Hello {
                    username,
                    hostname,
                    xor_key,
                }
            }
            CommandId::ReKey => Packet::ReKey {
                xor_key: r.read_u8()?,
            },
            CommandId::Goodbye => Packet::Goodbye {
                message: r.read_str()?,
            },
            CommandId::Message => Packet::Message {
                username: r.read_str()?,
                message: r.read_str()?,
            },
            CommandId::SendFile => Packet::SendFile {
                username: r.read_str()?,
                filename: r.read_str()?,
                data: r.read_bytes()?,
            },
            CommandId::Target => {
                if depth >= MAX_TARGET_DEPTH {
                    return Err(ProtocolError::NestingTooDeep(MAX_TARGET_DEPTH));
                }
                let destination = r.read_str()?;
                let inner = CommandId::from_code(i64::from(r.read_i32()?))?;
                Packet::Target {
                    destination,
                    packet: Box::new(Self::read_nested(inner, r, depth + 1)?),
                }
            }
            CommandId::GetUserList => Packet::GetUserList,
            CommandId::UserList => {
                let count = r.read_i32()?;
                if count < 0 {
                    return Err(ProtocolError::Malformed(format!(
                        "negative user list count {count}"
                    )));
                }
                let mut entries = Vec::with_capacity((count as usize).min(1024));
                for _ in 0..count {
                    let username = r.read_str()?;
                    let hostname = r.read_str()?;
                    entries.push(UserListEntry { username, hostname });
                }
                Packet::UserList { entries }
            }
            CommandId::Ping => Packet::Ping,
        };
        Ok(packet)
    }
}

/// Primitive field sink implemented by each wire encoding.
pub trait FieldWriter {
    fn write_str(&mut self, value: &str);
    fn write_i32(&mut self, value: i32);
    fn write_bool(&mut self, value: bool);
    fn write_bytes(&mut self, value: &[u8]);
    fn write_u8(&mut self, value: u8);
}

/// Primitive field source implemented by each wire encoding.
pub trait FieldReader {
    fn read_str(&mut self) -> Result<String>;
    fn read_i32(&mut self) -> Result<i32>;
    fn read_bool(&mut self) -> Result<bool>;
    fn read_bytes(&mut self) -> Result<Vec<u8>>;
    fn read_u8(&mut self) -> Result<u8>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_codes_are_stable() {
        assert_eq!(CommandId::Hello.code(), 0);
        assert_eq!(CommandId::Target.code(), 5);
        assert_eq!(CommandId::Ping.code(), 8);
        assert_eq!(CommandId::from_code(7).unwrap(), CommandId::UserList);
        assert!(matches!(
            CommandId::from_code(9),
            Err(ProtocolError::UnknownCommand(9))
        ));
        assert!(CommandId::from_code(-1).is_err());
    }

    #[test]
    fn test_command_names() {
        for id in CommandId::ALL {
            assert_eq!(CommandId::from_name(id.name()).unwrap(), id);
        }
        assert!(CommandId::from_name("hello").is_err());
    }

    #[test]
    fn test_hello_constructor_sets_upgrade_flag() {
        match Packet::hello("alice", "box", true) {
            Packet::Hello { xor_key, .. } => assert_eq!(xor_key, Some(0)),
            other => panic!("unexpected {other:?}"),
        }
        match Packet::hello("alice", "box", false) {
            Packet::Hello { xor_key, .. } => assert_eq!(xor_key, None),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_target_command() {
        let p = Packet::target("bob", Packet::Ping);
        assert_eq!(p.command(), CommandId::Target);
    }
}
