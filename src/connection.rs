//! # Connection Abstraction
//!
//! One read/write/rekey/dispose contract over both kinds of peer:
//!
//! - **Stream**: a TCP (optionally TLS) byte stream. On the server side the
//!   encoding is unknown until the first read consumes the magic value; on the
//!   client side it is chosen up front and the magic is written immediately.
//! - **Datagram**: a UDP virtual session (server) or connected UDP socket
//!   (client). Always binary, never negotiated, never ciphered.
//!
//! A [`Connection`] splits into a [`PacketReader`] and a [`PacketWriter`] so
//! a pending read can be owned by the server loop while other clients keep
//! writing to the same peer.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use bytes::BytesMut;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_util::codec::{Encoder, FramedRead};
use tracing::{debug, instrument};

use crate::core::codec::ChatCodec;
use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use crate::transport::negotiate::{self, TransportKind};
use crate::transport::udp::{UdpPeer, UdpSession, UdpSessionReader, UdpSessionWriter};
use crate::transport::xor::{XorCodec, XorKey};

/// Any duplex byte stream a connection can run over.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> ByteStream for T {}

type BoxedStream = Box<dyn ByteStream>;

/// Where a connection came from, for logging and placeholder names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub remote: String,
    pub transport: &'static str,
}

impl Endpoint {
    pub fn new(remote: impl Into<String>, transport: &'static str) -> Self {
        Self {
            remote: remote.into(),
            transport,
        }
    }

    pub fn from_addr(addr: SocketAddr, transport: &'static str) -> Self {
        Self::new(addr.to_string(), transport)
    }
}

/// A peer that can read and write packets.
pub struct Connection {
    reader: PacketReader,
    writer: PacketWriter,
}

impl Connection {
    /// Server side of a freshly accepted stream. The encoding is resolved by
    /// the first read.
    pub fn accept_stream<S: ByteStream>(stream: S, buffered: bool) -> Self {
        let key = XorKey::default();
        let negotiated = Arc::new(OnceLock::new());
        let (read, write) = tokio::io::split(Box::new(stream) as BoxedStream);
        Self {
            reader: PacketReader::Stream(StreamReader {
                state: ReadState::Negotiating(Some(read)),
                key: key.clone(),
                negotiated: Arc::clone(&negotiated),
            }),
            writer: PacketWriter::Stream(StreamWriter::new(write, key, negotiated, buffered)),
        }
    }

    /// Client side of a stream: announces `kind` before returning.
    #[instrument(skip(stream))]
    pub async fn connect_stream<S: ByteStream>(
        mut stream: S,
        kind: TransportKind,
        buffered: bool,
    ) -> Result<Self> {
        negotiate::write_magic(&mut stream, kind).await?;

        let key = XorKey::default();
        let negotiated = Arc::new(OnceLock::new());
        let _ = negotiated.set(kind);
        let (read, write) = tokio::io::split(Box::new(stream) as BoxedStream);
        Ok(Self {
            reader: PacketReader::Stream(StreamReader {
                state: ReadState::Framed(FramedRead::new(
                    read,
                    XorCodec::new(ChatCodec::for_kind(kind), key.clone()),
                )),
                key: key.clone(),
                negotiated: Arc::clone(&negotiated),
            }),
            writer: PacketWriter::Stream(StreamWriter::new(write, key, negotiated, buffered)),
        })
    }

    /// Server side of a UDP virtual session.
    pub fn udp_session(session: UdpSession) -> Self {
        let (reader, writer) = session.into_split();
        Self {
            reader: PacketReader::Datagram(reader),
            writer: PacketWriter::Datagram(writer),
        }
    }

    /// Client side of a UDP conversation.
    pub fn udp_peer(peer: UdpPeer) -> Self {
        Self {
            reader: PacketReader::Peer(peer.handle()),
            writer: PacketWriter::Peer(peer),
        }
    }

    pub async fn read_packet(&mut self) -> Result<Packet> {
        self.reader.read_packet().await
    }

    pub async fn write_packet(&mut self, packet: &Packet) -> bool {
        self.writer.write_packet(packet).await
    }

    pub fn set_key(&self, key: u8) {
        self.writer.set_key(key);
    }

    pub fn kind(&self) -> Option<TransportKind> {
        self.reader.kind()
    }

    pub async fn dispose(self) {
        self.writer.dispose().await;
    }

    pub fn into_split(self) -> (PacketReader, PacketWriter) {
        (self.reader, self.writer)
    }
}

enum ReadState {
    Negotiating(Option<ReadHalf<BoxedStream>>),
    Framed(FramedRead<ReadHalf<BoxedStream>, XorCodec<ChatCodec>>),
}

pub struct StreamReader {
    state: ReadState,
    key: XorKey,
    negotiated: Arc<OnceLock<TransportKind>>,
}

impl StreamReader {
    async fn read_packet(&mut self) -> Result<Packet> {
        if let ReadState::Negotiating(raw) = &mut self.state {
            let mut raw = raw.take().ok_or(ProtocolError::ConnectionClosed)?;
            let kind = negotiate::read_magic(&mut raw).await?;
            let _ = self.negotiated.set(kind);
            self.state = ReadState::Framed(FramedRead::new(
                raw,
                XorCodec::new(ChatCodec::for_kind(kind), self.key.clone()),
            ));
        }

        match &mut self.state {
            ReadState::Framed(framed) => match framed.next().await {
                Some(result) => result,
                None => Err(ProtocolError::ConnectionClosed),
            },
            ReadState::Negotiating(_) => Err(ProtocolError::NotNegotiated),
        }
    }
}

pub struct StreamWriter {
    io: WriteHalf<BoxedStream>,
    codec: XorCodec<ChatCodec>,
    negotiated: Arc<OnceLock<TransportKind>>,
    buf: BytesMut,
    buffered: bool,
}

impl StreamWriter {
    fn new(
        io: WriteHalf<BoxedStream>,
        key: XorKey,
        negotiated: Arc<OnceLock<TransportKind>>,
        buffered: bool,
    ) -> Self {
        let codec = match negotiated.get() {
            Some(kind) => ChatCodec::for_kind(*kind),
            None => ChatCodec::Pending,
        };
        Self {
            io,
            codec: XorCodec::new(codec, key),
            negotiated,
            buf: BytesMut::new(),
            buffered,
        }
    }

    async fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        if self.codec.inner().kind().is_none() {
            if let Some(kind) = self.negotiated.get() {
                *self.codec.inner_mut() = ChatCodec::for_kind(*kind);
            }
        }

        self.buf.clear();
        self.codec.encode(packet, &mut self.buf)?;

        if self.buffered || self.codec.inner().kind() != Some(TransportKind::Binary) {
            self.io.write_all(&self.buf).await?;
        } else {
            // Unbuffered binary goes out field by field: length, checksum,
            // command, payload.
            for (start, end) in [(0, 4), (4, 8), (8, 9), (9, self.buf.len())] {
                if start < end {
                    self.io.write_all(&self.buf[start..end]).await?;
                }
            }
        }
        self.io.flush().await?;
        Ok(())
    }
}

/// Read half of a [`Connection`].
pub enum PacketReader {
    Stream(StreamReader),
    Datagram(UdpSessionReader),
    Peer(UdpPeer),
}

impl PacketReader {
    pub async fn read_packet(&mut self) -> Result<Packet> {
        match self {
            PacketReader::Stream(r) => r.read_packet().await,
            PacketReader::Datagram(r) => r.read_packet().await,
            PacketReader::Peer(p) => p.read_packet().await,
        }
    }

    /// Negotiated encoding; datagram peers are always binary.
    pub fn kind(&self) -> Option<TransportKind> {
        match self {
            PacketReader::Stream(r) => r.negotiated.get().copied(),
            PacketReader::Datagram(_) | PacketReader::Peer(_) => Some(TransportKind::Binary),
        }
    }
}

/// Write half of a [`Connection`].
pub enum PacketWriter {
    Stream(StreamWriter),
    Datagram(UdpSessionWriter),
    Peer(UdpPeer),
}

impl PacketWriter {
    /// Write one packet. Failures are logged and reported as `false`.
    pub async fn write_packet(&mut self, packet: &Packet) -> bool {
        match self {
            PacketWriter::Stream(w) => match w.write_packet(packet).await {
                Ok(()) => true,
                Err(e) => {
                    debug!(error = %e, command = packet.command().name(), "stream write failed");
                    false
                }
            },
            PacketWriter::Datagram(w) => w.write_packet(packet).await,
            PacketWriter::Peer(p) => match p.write_packet(packet).await {
                Ok(()) => true,
                Err(e) => {
                    debug!(error = %e, command = packet.command().name(), "datagram write failed");
                    false
                }
            },
        }
    }

    /// Replace the cipher key for both directions. No-op for datagrams.
    pub fn set_key(&self, key: u8) {
        if let PacketWriter::Stream(w) = self {
            w.codec.key().set(key);
        }
    }

    pub fn key(&self) -> u8 {
        match self {
            PacketWriter::Stream(w) => w.codec.key().get(),
            PacketWriter::Datagram(_) | PacketWriter::Peer(_) => 0,
        }
    }

    pub async fn dispose(self) {
        match self {
            PacketWriter::Stream(mut w) => {
                let _ = w.io.shutdown().await;
            }
            PacketWriter::Datagram(w) => w.dispose().await,
            PacketWriter::Peer(_) => {}
        }
    }
}
