//! Timeout constants and async timeout wrappers.
//!
//! Only handshakes are bounded: the TLS handshake on accept and the client's
//! wait for the server's answer to Hello. Steady-state reads never time out.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Window for the client to receive the server's answer to Hello.
pub const HELLO_TIMEOUT: Duration = Duration::from_millis(3000);

/// Window for a TLS handshake on an accepted connection.
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Re-ping a silent UDP peer after this long.
pub const UDP_PING_RETRY: Duration = Duration::from_secs(60);

/// Evict a silent UDP peer after this long.
pub const UDP_PING_TIMEOUT: Duration = Duration::from_secs(120);

/// Pause before re-issuing an accept that failed.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Run `fut`, mapping an elapsed deadline to [`ProtocolError::Timeout`].
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}
