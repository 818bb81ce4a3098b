//! # Chat Server
//!
//! Listeners, the packet router and the single-task server loop.
//!
//! ## Components
//! - **Listener**: plain TCP, TLS, or UDP accept semantics
//! - **Router**: per-packet dispatch over the client registry
//! - **Reactor**: the [`Server`] loop multiplexing accepts and reads

pub mod listener;
pub mod reactor;
pub mod router;

pub use listener::{Accepted, Listener};
pub use reactor::Server;
pub use router::{ClientEntry, Router};
