//! # Utility Modules
//!
//! Supporting utilities shared by the server, the client and the binaries.
//!
//! ## Components
//! - **Logging**: tracing-subscriber initialisation from [`LoggingConfig`](crate::config::LoggingConfig)
//! - **Timeout**: bounded waits for the two handshake reads

pub mod logging;
pub mod timeout;
