//! # UDP Virtual Sessions
//!
//! One bound socket serves every UDP peer. The manager demultiplexes incoming
//! datagrams by remote address into per-peer sessions, each with its own FIFO
//! queue, so the rest of the server can treat a UDP peer like any stream
//! connection.
//!
//! ## Accept semantics
//! [`UdpSessionManager::accept`] loops on `recv_from`. A datagram from a known
//! peer is queued to that peer's session and the loop continues; a datagram
//! from an unseen peer creates a session, queues the datagram and returns the
//! new session.
//!
//! ## Liveness
//! UDP has no connection state, so dead peers are found by probing. A
//! connection-reset error from the socket (an ICMP port-unreachable for an
//! earlier send) triggers a [`sweep`](UdpSessionManager::sweep):
//!
//! - no outstanding ping: send one, stamp the time
//! - pinged more than `ping_retry` ago: ping again, keep the stamp
//! - pinged more than `ping_timeout` ago: evict and cancel the session
//!
//! Any datagram read by the application clears the stamp.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::UdpConfig;
use crate::core::codec::{decode_datagram, encode_datagram};
use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};

struct SessionEntry {
    // Distinguishes a re-accepted peer from the session evicted before it.
    id: u64,
    queue: mpsc::UnboundedSender<Bytes>,
    cancel: CancellationToken,
    last_ping: Option<Instant>,
}

type SessionTable = Arc<Mutex<HashMap<SocketAddr, SessionEntry>>>;

/// Outcome of one liveness sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub pinged: Vec<SocketAddr>,
    pub evicted: Vec<SocketAddr>,
}

/// Demultiplexes a single UDP socket into per-peer sessions.
#[derive(Clone)]
pub struct UdpSessionManager {
    socket: Arc<UdpSocket>,
    sessions: SessionTable,
    next_id: Arc<AtomicU64>,
    config: UdpConfig,
    shutdown: CancellationToken,
}

impl UdpSessionManager {
    pub async fn bind(addr: SocketAddr, config: UdpConfig) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self::from_socket(socket, config))
    }

    /// Wrap an already-bound socket. Must run inside a tokio runtime when
    /// `sweep_interval` is set.
    pub fn from_socket(socket: UdpSocket, config: UdpConfig) -> Self {
        let manager = Self {
            socket: Arc::new(socket),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
            config,
            shutdown: CancellationToken::new(),
        };
        if let Some(interval) = manager.config.sweep_interval {
            manager.spawn_sweeper(interval);
        }
        manager
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Wait for a datagram from a peer that has no session yet.
    pub async fn accept(&self) -> Result<UdpSession> {
        let mut buf = vec![0u8; self.config.max_datagram];
        loop {
            let (len, peer) = tokio::select! {
                _ = self.shutdown.cancelled() => return Err(ProtocolError::Cancelled),
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(r) => r,
                    Err(e) if is_reset(&e) => {
                        warn!("One or more UDP peers is unreachable, probing sessions");
                        self.sweep(Instant::now()).await;
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, "UDP socket error");
                        continue;
                    }
                },
            };
            let datagram = Bytes::copy_from_slice(&buf[..len]);

            let mut sessions = self.sessions.lock().await;
            if let Some(entry) = sessions.get(&peer) {
                if entry.queue.send(datagram.clone()).is_ok() {
                    continue;
                }
                // Reader side is gone; start over with a fresh session.
                sessions.remove(&peer);
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let cancel = self.shutdown.child_token();
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            // Cannot fail: `rx` is alive.
            let _ = tx.send(datagram);
            sessions.insert(
                peer,
                SessionEntry {
                    id,
                    queue: tx,
                    cancel: cancel.clone(),
                    last_ping: None,
                },
            );
            debug!(%peer, "new UDP session");
            return Ok(UdpSession {
                id,
                peer,
                rx,
                cancel,
                socket: Arc::clone(&self.socket),
                sessions: Arc::clone(&self.sessions),
            });
        }
    }

    /// Probe every session, evicting the ones that stopped answering.
    ///
    /// Takes the current time so tests can drive the clock.
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        {
            let mut sessions = self.sessions.lock().await;
            let (retry, timeout) = (self.config.ping_retry, self.config.ping_timeout);
            sessions.retain(|peer, entry| match entry.last_ping {
                None => {
                    entry.last_ping = Some(now);
                    report.pinged.push(*peer);
                    true
                }
                Some(pinged_at) => {
                    let elapsed = now.saturating_duration_since(pinged_at);
                    if elapsed > timeout {
                        info!(%peer, "UDP peer exceeded ping response time");
                        entry.cancel.cancel();
                        report.evicted.push(*peer);
                        false
                    } else {
                        if elapsed > retry {
                            report.pinged.push(*peer);
                        }
                        true
                    }
                }
            });
        }

        let ping = encode_datagram(&Packet::Ping);
        for peer in &report.pinged {
            if let Err(e) = self.socket.try_send_to(&ping, *peer) {
                debug!(%peer, error = %e, "ping send failed");
            }
        }
        report
    }

    fn spawn_sweeper(&self, interval: Duration) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = manager.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.sweep(Instant::now()).await;
                    }
                }
            }
        });
    }

    /// Cancel every session and stop the sweeper.
    pub async fn dispose(&self) {
        self.shutdown.cancel();
        self.sessions.lock().await.clear();
    }
}

fn is_reset(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
    )
}

/// Server-side view of one UDP peer.
pub struct UdpSession {
    id: u64,
    peer: SocketAddr,
    rx: mpsc::UnboundedReceiver<Bytes>,
    cancel: CancellationToken,
    socket: Arc<UdpSocket>,
    sessions: SessionTable,
}

impl UdpSession {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn into_split(self) -> (UdpSessionReader, UdpSessionWriter) {
        let reader = UdpSessionReader {
            id: self.id,
            peer: self.peer,
            rx: self.rx,
            cancel: self.cancel.clone(),
            sessions: Arc::clone(&self.sessions),
        };
        let writer = UdpSessionWriter {
            id: self.id,
            peer: self.peer,
            cancel: self.cancel,
            socket: self.socket,
            sessions: self.sessions,
        };
        (reader, writer)
    }
}

pub struct UdpSessionReader {
    id: u64,
    peer: SocketAddr,
    rx: mpsc::UnboundedReceiver<Bytes>,
    cancel: CancellationToken,
    sessions: SessionTable,
}

impl UdpSessionReader {
    /// Dequeue and decode the next datagram, waiting until one arrives or
    /// the session is cancelled.
    pub async fn read_packet(&mut self) -> Result<Packet> {
        let datagram = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ProtocolError::Cancelled),
            datagram = self.rx.recv() => datagram.ok_or(ProtocolError::ConnectionClosed)?,
        };

        if let Some(entry) = self.sessions.lock().await.get_mut(&self.peer) {
            if entry.id == self.id {
                entry.last_ping = None;
            }
        }
        decode_datagram(&datagram)
    }
}

pub struct UdpSessionWriter {
    id: u64,
    peer: SocketAddr,
    cancel: CancellationToken,
    socket: Arc<UdpSocket>,
    sessions: SessionTable,
}

impl UdpSessionWriter {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Send one packet. A send failure cancels the session.
    pub async fn write_packet(&self, packet: &Packet) -> bool {
        let data = encode_datagram(packet);
        match self.socket.send_to(&data, self.peer).await {
            Ok(sent) => sent == data.len(),
            Err(e) => {
                debug!(peer = %self.peer, error = %e, "UDP send failed");
                self.cancel.cancel();
                false
            }
        }
    }

    /// Remove the session from the table and unblock its reader.
    ///
    /// A later session for the same peer address is left alone.
    pub async fn dispose(&self) {
        let mut sessions = self.sessions.lock().await;
        if sessions.get(&self.peer).is_some_and(|entry| entry.id == self.id) {
            sessions.remove(&self.peer);
        }
        drop(sessions);
        self.cancel.cancel();
    }
}

/// Client side of a UDP conversation: a connected socket with datagram framing.
pub struct UdpPeer {
    socket: Arc<UdpSocket>,
    max_datagram: usize,
}

impl UdpPeer {
    pub async fn connect<A: ToSocketAddrs>(addr: A, max_datagram: usize) -> Result<Self> {
        let target = tokio::net::lookup_host(addr)
            .await?
            .next()
            .ok_or_else(|| ProtocolError::ConfigError("address did not resolve".into()))?;
        let bind: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(target).await?;
        Ok(Self {
            socket: Arc::new(socket),
            max_datagram,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn read_packet(&self) -> Result<Packet> {
        let mut buf = vec![0u8; self.max_datagram];
        let len = self.socket.recv(&mut buf).await?;
        decode_datagram(&buf[..len])
    }

    pub async fn write_packet(&self, packet: &Packet) -> Result<()> {
        self.socket.send(&encode_datagram(packet)).await?;
        Ok(())
    }

    /// Cheap handle sharing the same socket, for a separate reader task.
    pub fn handle(&self) -> Self {
        Self {
            socket: Arc::clone(&self.socket),
            max_datagram: self.max_datagram,
        }
    }
}
