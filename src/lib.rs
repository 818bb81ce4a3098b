//! # Chat Protocol
//!
//! A small multi-transport chat protocol: one packet model carried over TCP
//! (plaintext or TLS) or UDP, in a binary or a line-oriented text encoding,
//! with an optional single-byte XOR cipher negotiated during Hello.
//!
//! ## Layers
//! - [`core`]: packet union, field encodings, framing codecs
//! - [`transport`]: magic negotiation, XOR cipher, TLS, SOCKS4, UDP sessions
//! - [`connection`]: one read/write/rekey/dispose contract for every peer
//! - [`server`]: listeners, packet router, single-task server loop
//! - [`client`]: connect, Hello handshake, send helpers, REPL command parsing
//!
//! The XOR cipher is obfuscation only. Nothing here authenticates users or
//! protects message confidentiality beyond what TLS provides.
//!
//! ## Example
//! ```no_run
//! use chat_protocol::config::{ServerConfig, UdpConfig};
//! use chat_protocol::server::Server;
//!
//! # async fn run() -> chat_protocol::error::Result<()> {
//! let server = Server::bind(&ServerConfig::default(), &UdpConfig::default()).await?;
//! server.run().await
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod core;
pub mod error;
pub mod server;
pub mod transport;
pub mod utils;

pub use crate::client::{ChatClient, ClientCommand};
pub use crate::connection::{Connection, PacketReader, PacketWriter};
pub use crate::core::packet::{CommandId, Packet, UserListEntry};
pub use crate::error::{ProtocolError, Result};
pub use crate::server::Server;
