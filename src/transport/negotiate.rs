//! Encoding negotiation for fresh TCP connections.
//!
//! The first four bytes a client sends (big-endian) select the encoding for
//! the rest of the connection. UDP never negotiates; it is always binary.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{ProtocolError, Result};

/// "BINX"
pub const BINARY_MAGIC: u32 = 0x4249_4e58;
/// "TEXT"
pub const TEXT_MAGIC: u32 = 0x5445_5854;

/// Encoding selected for a stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Binary,
    Text,
}

impl TransportKind {
    pub fn magic(self) -> u32 {
        match self {
            TransportKind::Binary => BINARY_MAGIC,
            TransportKind::Text => TEXT_MAGIC,
        }
    }

    pub fn from_magic(magic: u32) -> Result<Self> {
        match magic {
            BINARY_MAGIC => Ok(TransportKind::Binary),
            TEXT_MAGIC => Ok(TransportKind::Text),
            other => Err(ProtocolError::InvalidMagic(other)),
        }
    }
}

/// Read the magic value and resolve the transport kind.
pub async fn read_magic<R: AsyncRead + Unpin>(reader: &mut R) -> Result<TransportKind> {
    let magic = reader.read_u32().await?;
    let kind = TransportKind::from_magic(magic)?;
    debug!(?kind, "negotiated transport");
    Ok(kind)
}

/// Announce the transport kind; clients call this before sending Hello.
pub async fn write_magic<W: AsyncWrite + Unpin>(writer: &mut W, kind: TransportKind) -> Result<()> {
    writer.write_u32(kind.magic()).await?;
    writer.flush().await?;
    Ok(())
}
