//! SOCKS4 CONNECT tunnelling for clients behind a proxy.

use std::net::{Ipv4Addr, SocketAddrV4};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::error::{constants, ProtocolError, Result};

const SOCKS_VERSION: u8 = 4;
const CMD_CONNECT: u8 = 1;
const REPLY_GRANTED: u8 = 0x5a;

/// Build the 9-byte CONNECT request (empty user id).
pub fn connect_request(target: SocketAddrV4) -> [u8; 9] {
    let mut req = [0u8; 9];
    req[0] = SOCKS_VERSION;
    req[1] = CMD_CONNECT;
    req[2..4].copy_from_slice(&target.port().to_be_bytes());
    req[4..8].copy_from_slice(&target.ip().octets());
    // req[8] is the user id terminator
    req
}

/// Perform the CONNECT handshake on an already-open proxy stream.
pub async fn handshake<S>(stream: &mut S, target: SocketAddrV4) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&connect_request(target)).await?;
    stream.flush().await?;

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).await?;
    if reply[1] != REPLY_GRANTED {
        return Err(ProtocolError::Socks(format!(
            "{} (status {:#04x})",
            constants::ERR_SOCKS_REJECTED,
            reply[1]
        )));
    }
    Ok(())
}

/// Connect to `proxy` and tunnel through to `target`.
#[instrument(skip_all, fields(proxy = %proxy, target = %target))]
pub async fn connect(proxy: &str, target: SocketAddrV4) -> Result<TcpStream> {
    let mut stream = TcpStream::connect(proxy).await?;
    handshake(&mut stream, target).await?;
    debug!("SOCKS tunnel established");
    Ok(stream)
}

/// Convenience for callers holding a bare address.
pub fn target(ip: Ipv4Addr, port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(ip, port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_layout() {
        let req = connect_request(target(Ipv4Addr::new(10, 1, 2, 3), 12345));
        assert_eq!(req, [4, 1, 0x30, 0x39, 10, 1, 2, 3, 0]);
    }

    #[tokio::test]
    async fn test_granted_reply() {
        let (mut client, mut proxy) = tokio::io::duplex(64);
        let server = tokio::spawn(async move {
            let mut req = [0u8; 9];
            proxy.read_exact(&mut req).await.unwrap();
            proxy.write_all(&[0, 0x5a, 0, 0, 0, 0, 0, 0]).await.unwrap();
            req
        });

        handshake(&mut client, target(Ipv4Addr::LOCALHOST, 80))
            .await
            .unwrap();
        let req = server.await.unwrap();
        assert_eq!(&req[4..8], &[127, 0, 0, 1]);
    }

    #[tokio::test]
    async fn test_rejected_reply() {
        let (mut client, mut proxy) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let mut req = [0u8; 9];
            proxy.read_exact(&mut req).await.unwrap();
            proxy.write_all(&[0, 0x5b, 0, 0, 0, 0, 0, 0]).await.unwrap();
        });

        let err = handshake(&mut client, target(Ipv4Addr::LOCALHOST, 80))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Socks(_)));
    }

    #[tokio::test]
    async fn test_short_reply_is_error() {
        let (mut client, mut proxy) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let mut req = [0u8; 9];
            proxy.read_exact(&mut req).await.unwrap();
            proxy.write_all(&[0, 0x5a]).await.unwrap();
        });

        assert!(handshake(&mut client, target(Ipv4Addr::LOCALHOST, 80))
            .await
            .is_err());
    }
}
