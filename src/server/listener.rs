//! Listeners: one bound socket each, producing accepted [`Connection`]s.
//!
//! A listener is moved into its pending accept and handed back alongside the
//! result, so the server loop always holds exactly one pending accept per
//! listener without sharing it.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

use crate::connection::{Connection, Endpoint};
use crate::error::Result;
use crate::transport::udp::UdpSessionManager;
use crate::utils::timeout::with_timeout_error;

/// A connection produced by [`Listener::accept`].
pub struct Accepted {
    pub connection: Connection,
    pub endpoint: Endpoint,
}

pub enum Listener {
    Tcp {
        listener: TcpListener,
        buffered: bool,
    },
    Tls {
        listener: TcpListener,
        acceptor: TlsAcceptor,
        handshake_timeout: Duration,
        buffered: bool,
    },
    Udp(UdpSessionManager),
}

impl Listener {
    pub async fn tcp(addr: SocketAddr, buffered: bool) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "TCP listener bound");
        Ok(Listener::Tcp { listener, buffered })
    }

    pub async fn tls(
        addr: SocketAddr,
        acceptor: TlsAcceptor,
        handshake_timeout: Duration,
        buffered: bool,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "TLS listener bound");
        Ok(Listener::Tls {
            listener,
            acceptor,
            handshake_timeout,
            buffered,
        })
    }

    pub fn udp(manager: UdpSessionManager) -> Self {
        Listener::Udp(manager)
    }

    pub fn transport(&self) -> &'static str {
        match self {
            Listener::Tcp { .. } => "TCP",
            Listener::Tls { .. } => "TLS",
            Listener::Udp(_) => "UDP",
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        match self {
            Listener::Tcp { listener, .. } | Listener::Tls { listener, .. } => {
                Ok(listener.local_addr()?)
            }
            Listener::Udp(manager) => manager.local_addr(),
        }
    }

    /// Wait for the next peer. The TLS handshake runs here, bounded by the
    /// configured timeout.
    pub async fn accept(self) -> (Self, Result<Accepted>) {
        let result = self.accept_one().await;
        (self, result)
    }

    async fn accept_one(&self) -> Result<Accepted> {
        match self {
            Listener::Tcp { listener, buffered } => {
                let (stream, peer) = listener.accept().await?;
                let _ = stream.set_nodelay(true);
                debug!(%peer, "accepted TCP connection");
                Ok(Accepted {
                    connection: Connection::accept_stream(stream, *buffered),
                    endpoint: Endpoint::from_addr(peer, "TCP"),
                })
            }
            Listener::Tls {
                listener,
                acceptor,
                handshake_timeout,
                buffered,
            } => {
                let (stream, peer) = listener.accept().await?;
                let _ = stream.set_nodelay(true);
                let tls = with_timeout_error(
                    async { Ok(acceptor.accept(stream).await?) },
                    *handshake_timeout,
                )
                .await?;
                debug!(%peer, "TLS handshake complete");
                Ok(Accepted {
                    connection: Connection::accept_stream(tls, *buffered),
                    endpoint: Endpoint::from_addr(peer, "TLS"),
                })
            }
            Listener::Udp(manager) => {
                let session = manager.accept().await?;
                let endpoint = Endpoint::from_addr(session.peer(), "UDP");
                Ok(Accepted {
                    connection: Connection::udp_session(session),
                    endpoint,
                })
            }
        }
    }
}
