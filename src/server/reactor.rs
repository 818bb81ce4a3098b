//! # Server Loop
//!
//! A single task drives every listener and every live connection. Each
//! pending operation is a future in one [`FuturesUnordered`] set:
//!
//! - one pending accept per listener
//! - one pending read per registered client
//!
//! The loop waits for whichever completes first. An accept registers the new
//! client, issues its first read and re-issues the accept. A read either
//! hands the packet to the [`Router`] (and re-issues the read if the router
//! says to keep the connection) or, on failure, drops the client.
//!
//! The client registry is owned by the loop alone; the router only sees it
//! for the duration of one dispatch.

use std::net::SocketAddr;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ServerConfig, UdpConfig};
use crate::connection::PacketReader;
use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use crate::server::listener::{Accepted, Listener};
use crate::server::router::{ClientEntry, Router};
use crate::transport::tls::TlsServerConfig;
use crate::transport::udp::UdpSessionManager;
use crate::utils::timeout::ACCEPT_RETRY_DELAY;

enum Event {
    Accepted {
        listener: Listener,
        result: Result<Accepted>,
    },
    Read {
        id: u64,
        reader: PacketReader,
        result: Result<Packet>,
    },
}

/// Wait `delay` (zero for none), then accept on `listener`.
fn accept_event(listener: Listener, delay: Duration) -> BoxFuture<'static, Event> {
    async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let (listener, result) = listener.accept().await;
        Event::Accepted { listener, result }
    }
    .boxed()
}

fn read_event(id: u64, mut reader: PacketReader) -> BoxFuture<'static, Event> {
    async move {
        let result = reader.read_packet().await;
        Event::Read { id, reader, result }
    }
    .boxed()
}

/// The chat server: listeners plus the packet router.
pub struct Server {
    listeners: Vec<Listener>,
    udp: Vec<UdpSessionManager>,
    router: Router,
}

impl Server {
    /// Bind plain TCP on `port`, TLS on `port + 1` when a certificate is
    /// configured, and UDP on `port`.
    #[instrument(skip_all, fields(port = config.port, global = config.global_bind))]
    pub async fn bind(config: &ServerConfig, udp: &UdpConfig) -> Result<Self> {
        config.validate_strict()?;
        let ip = config.bind_ip();
        let mut listeners = Vec::new();

        listeners.push(Listener::tcp(SocketAddr::new(ip, config.port), config.buffered).await?);

        if let (Some(cert), Some(key)) = (&config.cert_path, &config.key_path) {
            let tls = TlsServerConfig::new(cert, key);
            let port = config.tls_port().ok_or_else(|| {
                ProtocolError::ConfigError("TLS port would overflow".to_string())
            })?;
            info!(port, fingerprint = %tls.fingerprint()?, "Starting TLS listener");
            listeners.push(
                Listener::tls(
                    SocketAddr::new(ip, port),
                    tls.acceptor()?,
                    config.tls_handshake_timeout,
                    config.buffered,
                )
                .await?,
            );
        }

        let manager = UdpSessionManager::bind(SocketAddr::new(ip, config.port), udp.clone()).await?;
        listeners.push(Listener::udp(manager));

        Ok(Self::from_listeners(listeners))
    }

    pub fn from_listeners(listeners: Vec<Listener>) -> Self {
        let udp = listeners
            .iter()
            .filter_map(|l| match l {
                Listener::Udp(manager) => Some(manager.clone()),
                _ => None,
            })
            .collect();
        Self {
            listeners,
            udp,
            router: Router::new(),
        }
    }

    pub fn with_router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Bound addresses, labelled by transport.
    pub fn local_addrs(&self) -> Vec<(&'static str, SocketAddr)> {
        self.listeners
            .iter()
            .filter_map(|l| l.local_addr().ok().map(|a| (l.transport(), a)))
            .collect()
    }

    /// Run until ctrl-c.
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received shutdown signal, initiating graceful shutdown");
                let _ = shutdown_tx_clone.send(()).await;
            }
        });

        let result = self.run_with_shutdown(shutdown_rx).await;
        drop(shutdown_tx);
        result
    }

    /// Run until a message arrives on `shutdown_rx` or every sender is dropped.
    pub async fn run_with_shutdown(mut self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let mut pending: FuturesUnordered<BoxFuture<'static, Event>> = FuturesUnordered::new();
        for listener in self.listeners.drain(..) {
            info!(transport = listener.transport(), addr = ?listener.local_addr().ok(), "Listening");
            pending.push(accept_event(listener, Duration::ZERO));
        }

        let mut clients: Vec<ClientEntry> = Vec::new();
        let mut next_id: u64 = 0;

        loop {
            let event = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Closing server");
                    break;
                }
                event = pending.next() => match event {
                    Some(event) => event,
                    None => {
                        warn!("No pending operations left");
                        break;
                    }
                },
            };

            match event {
                Event::Accepted { listener, result } => {
                    let delay = match result {
                        Ok(Accepted {
                            connection,
                            endpoint,
                        }) => {
                            let id = next_id;
                            next_id += 1;
                            info!(
                                peer = %endpoint.remote,
                                transport = endpoint.transport,
                                "Connection accepted"
                            );
                            let (reader, writer) = connection.into_split();
                            clients.push(ClientEntry::new(id, endpoint, writer));
                            pending.push(read_event(id, reader));
                            Duration::ZERO
                        }
                        Err(ProtocolError::Cancelled) => {
                            debug!(transport = listener.transport(), "listener closed");
                            continue;
                        }
                        Err(e) => {
                            warn!(transport = listener.transport(), error = %e, "Accept failed");
                            // Errors such as EMFILE tend to repeat.
                            ACCEPT_RETRY_DELAY
                        }
                    };
                    pending.push(accept_event(listener, delay));
                }
                Event::Read { id, reader, result } => {
                    let Some(index) = clients.iter().position(|c| c.id == id) else {
                        continue;
                    };

                    let keep_open = match result {
                        Ok(packet) => {
                            debug!(client = id, command = packet.command().name(), "Received packet");
                            let (before, rest) = clients.split_at_mut(index);
                            match rest.split_first_mut() {
                                Some((client, after)) => {
                                    let mut others: Vec<&mut ClientEntry> =
                                        before.iter_mut().chain(after.iter_mut()).collect();
                                    self.router.dispatch(client, &mut others, packet).await
                                }
                                None => false,
                            }
                        }
                        Err(e) => {
                            log_read_error(&clients[index], &e);
                            false
                        }
                    };

                    if keep_open {
                        pending.push(read_event(id, reader));
                    } else {
                        let client = clients.remove(index);
                        info!(user = %client.username, peer = %client.endpoint.remote, "Closing client");
                        drop(reader);
                        client.writer.dispose().await;
                    }
                }
            }
        }

        // Dropping the pending set closes every listener socket and read half.
        drop(pending);
        for client in clients {
            client.writer.dispose().await;
        }
        for manager in &self.udp {
            manager.dispose().await;
        }
        Ok(())
    }
}

fn log_read_error(client: &ClientEntry, e: &ProtocolError) {
    match e {
        ProtocolError::ConnectionClosed | ProtocolError::Cancelled => {
            debug!(user = %client.username, "client went away");
        }
        e if e.is_framing() => {
            warn!(user = %client.username, error = %e, "Framing error from client");
        }
        e if e.is_transport() => {
            info!(user = %client.username, error = %e, "Transport error from client");
        }
        e => error!(user = %client.username, error = %e, "Error from client"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_delayed_accept_waits_before_accepting() {
        let listener = Listener::tcp("127.0.0.1:0".parse().unwrap(), false)
            .await
            .unwrap();
        let _stream = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();

        let mut event = accept_event(listener, Duration::from_millis(300));
        assert!(
            tokio::time::timeout(Duration::from_millis(50), &mut event)
                .await
                .is_err(),
            "a waiting connection must not be accepted during the retry delay"
        );

        match event.await {
            Event::Accepted { result, .. } => assert!(result.is_ok()),
            Event::Read { .. } => panic!("expected an accept event"),
        }
    }
}
