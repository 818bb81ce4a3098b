//! # Core Protocol Components
//!
//! Packet model, field encodings and framing codecs.
//!
//! ## Components
//! - **Packet**: the tagged union of every command, with recursive Target
//! - **Binary / Text**: field-level writers and readers for the two encodings
//! - **Codec**: tokio codecs that frame packets over byte streams, plus the
//!   UDP datagram framing
//!
//! ## Wire Format
//! ```text
//! binary stream:  [TotalLength(4)] [Checksum(4)] [Command(1)] [Payload(TotalLength - 1)]
//! datagram:       [Checksum(4)] [Command(1)] [Payload]
//! text:           <CommandName> <field> <field> ...\n
//! ```
//!
//! ## Limits
//! - Maximum frame size: 16MB
//! - Target nesting depth: 32

pub mod binary;
pub mod codec;
pub mod packet;
pub mod text;
