//! # Error Types
//!
//! Error handling for the chat protocol.
//!
//! Every failure the protocol can produce is a variant of [`ProtocolError`].
//! The variants fall into the classes the server acts on:
//!
//! ## Error Categories
//! - **Framing**: bad magic, bad checksum, malformed length or field data.
//!   Fatal to the connection that produced it.
//! - **Transport**: socket resets, TLS failures, timeouts, cancellation.
//!   Also fatal to the connection.
//! - **Protocol**: unexpected packets during the client handshake.
//! - **Configuration**: missing private key, bad endpoint strings. Raised at
//!   startup only.
//!
//! ## Example Usage
//! ```rust
//! use chat_protocol::error::{ProtocolError, Result};
//!
//! fn check_length(total_len: i32) -> Result<usize> {
//!     if total_len < 1 {
//!         return Err(ProtocolError::InvalidLength(total_len));
//!     }
//!     Ok(total_len as usize)
//! }
//!
//! assert!(check_length(0).unwrap_err().is_framing());
//! ```

use std::io;
use thiserror::Error;

use crate::core::packet::CommandId;

/// Error message constants shared by several call sites.
pub mod constants {
    pub const ERR_MISSING_PRIVATE_KEY: &str = "server certificate must contain a private key";
    pub const ERR_INVALID_ENDPOINT: &str = "invalid endpoint string";
    pub const ERR_NO_IPV4_ADDRESS: &str = "cannot get an IPv4 address for host";
    pub const ERR_SOCKS_REJECTED: &str = "failed to connect through SOCKS proxy";
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid magic received {0:X}")]
    InvalidMagic(u32),

    #[error("Checksum does not match (expected {expected:#x}, got {actual:#x})")]
    ChecksumMismatch { expected: i32, actual: i32 },

    #[error("Invalid length field {0}, must be at least 1 for command")]
    InvalidLength(i32),

    #[error("Frame of {0} bytes exceeds the maximum frame size")]
    OversizedFrame(usize),

    #[error("Truncated packet data")]
    Truncated,

    #[error("Unsupported command {0}")]
    UnknownCommand(i64),

    #[error("Unknown command name '{0}'")]
    UnknownCommandName(String),

    #[error("Target packets nested deeper than {0} levels")]
    NestingTooDeep(usize),

    #[error("Malformed field: {0}")]
    Malformed(String),

    #[error("Transport has not been negotiated")]
    NotNegotiated,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Session cancelled")]
    Cancelled,

    #[error("Timeout occurred")]
    Timeout,

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("SOCKS error: {0}")]
    Socks(String),

    #[error("Server rejected the connection: {0}")]
    HandshakeRejected(String),

    #[error("Unexpected {0:?} packet")]
    UnexpectedPacket(CommandId),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// True for errors caused by malformed bytes on the wire.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidMagic(_)
                | ProtocolError::ChecksumMismatch { .. }
                | ProtocolError::InvalidLength(_)
                | ProtocolError::OversizedFrame(_)
                | ProtocolError::Truncated
                | ProtocolError::UnknownCommand(_)
                | ProtocolError::UnknownCommandName(_)
                | ProtocolError::NestingTooDeep(_)
                | ProtocolError::Malformed(_)
        )
    }

    /// True for socket, TLS, timeout and cancellation failures.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_)
                | ProtocolError::NotNegotiated
                | ProtocolError::ConnectionClosed
                | ProtocolError::Cancelled
                | ProtocolError::Timeout
                | ProtocolError::TlsError(_)
                | ProtocolError::Socks(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
