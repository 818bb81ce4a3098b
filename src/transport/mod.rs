//! # Transport Layer
//!
//! Everything between a socket and the framing codecs.
//!
//! ## Components
//! - **Negotiate**: the 4-byte magic that selects binary or text
//! - **XOR**: the single-byte rekeyable cipher
//! - **TLS**: rustls configuration for the TLS listener and client
//! - **SOCKS**: SOCKS4 CONNECT tunnelling for clients
//! - **UDP**: virtual sessions over one UDP socket, with liveness probing

pub mod negotiate;
pub mod socks;
pub mod tls;
pub mod udp;
pub mod xor;
