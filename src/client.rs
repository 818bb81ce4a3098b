//! # Chat Client
//!
//! Connects to a chat server over TCP, TLS, SOCKS4 or UDP, performs the Hello
//! handshake and exposes typed send helpers. Interactive input parsing lives
//! in [`ClientCommand`] so the binary's read loop stays trivial.

use std::net::{IpAddr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, info, instrument};

use crate::config::{parse_endpoint, ClientConfig};
use crate::connection::{Connection, PacketReader, PacketWriter};
use crate::core::packet::Packet;
use crate::error::{constants, ProtocolError, Result};
use crate::transport::negotiate::TransportKind;
use crate::transport::socks;
use crate::transport::tls::TlsClientConfig;
use crate::transport::udp::UdpPeer;
use crate::utils::timeout::{with_timeout_error, TLS_HANDSHAKE_TIMEOUT};

/// Goodbye reason used by `/quit` without an argument.
pub const DEFAULT_QUIT_MESSAGE: &str = "I'm going away now!";

/// Name this machine announces in Hello.
pub fn local_hostname() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| String::from("localhost"))
}

/// Resolve `host`, preferring an IPv4 address.
pub async fn resolve_ipv4(host: &str, port: u16) -> Result<SocketAddrV4> {
    if let Ok(IpAddr::V4(ip)) = host.parse::<IpAddr>() {
        return Ok(SocketAddrV4::new(ip, port));
    }
    tokio::net::lookup_host((host, port))
        .await?
        .find_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| ProtocolError::ConfigError(constants::ERR_NO_IPV4_ADDRESS.to_string()))
}

pub struct ChatClient {
    connection: Connection,
    username: String,
}

impl ChatClient {
    /// Open a connection as described by `config`. Does not send Hello.
    #[instrument(skip_all, fields(host = %config.host, port = config.port, tls = config.tls, udp = config.udp))]
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        config.validate_strict()?;

        let connection = if config.udp {
            let addr = resolve_ipv4(&config.host, config.port).await?;
            let peer = UdpPeer::connect(addr, crate::config::MAX_DATAGRAM_SIZE).await?;
            Connection::udp_peer(peer)
        } else {
            let kind = if config.text {
                TransportKind::Text
            } else {
                TransportKind::Binary
            };
            let target = resolve_ipv4(&config.host, config.connect_port()?).await?;
            let tcp = match &config.socks_proxy {
                Some(proxy) => {
                    let (proxy_host, proxy_port) = parse_endpoint(proxy)?;
                    socks::connect(&format!("{proxy_host}:{proxy_port}"), target).await?
                }
                None => TcpStream::connect(target).await?,
            };
            let _ = tcp.set_nodelay(true);

            if config.tls {
                let mut tls = TlsClientConfig::new(config.host.as_str());
                if !config.verify_tls {
                    tls = tls.insecure();
                }
                let connector = tls.connector()?;
                let server_name = tls.server_name()?;
                let stream = with_timeout_error(
                    async {
                        connector
                            .connect(server_name, tcp)
                            .await
                            .map_err(|e| ProtocolError::TlsError(e.to_string()))
                    },
                    TLS_HANDSHAKE_TIMEOUT,
                )
                .await?;
                let (_, session) = stream.get_ref();
                info!(
                    version = ?session.protocol_version(),
                    suite = ?session.negotiated_cipher_suite().map(|s| s.suite()),
                    "TLS established"
                );
                Connection::connect_stream(stream, kind, config.buffered).await?
            } else {
                Connection::connect_stream(tcp, kind, config.buffered).await?
            }
        };

        Ok(Self::from_connection(connection, config.username.clone()))
    }

    pub fn from_connection(connection: Connection, username: String) -> Self {
        Self {
            connection,
            username,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Send Hello and wait for the server's ReKey.
    ///
    /// A Goodbye in reply means the server refused us; anything else besides
    /// ReKey is a protocol error.
    #[instrument(skip(self), fields(user = %self.username))]
    pub async fn hello(&mut self, hostname: &str, supports_upgrade: bool, wait: Duration) -> Result<u8> {
        let hello = Packet::hello(self.username.as_str(), hostname, supports_upgrade);
        self.write_packet(&hello).await?;

        let reply = with_timeout_error(self.connection.read_packet(), wait).await?;
        match reply {
            Packet::ReKey { xor_key } => {
                self.connection.set_key(xor_key);
                debug!(xor_key, "rekeyed");
                Ok(xor_key)
            }
            Packet::Goodbye { message } => Err(ProtocolError::HandshakeRejected(message)),
            other => Err(ProtocolError::UnexpectedPacket(other.command())),
        }
    }

    /// Hello with this machine's hostname and the configured options.
    pub async fn handshake(&mut self, config: &ClientConfig) -> Result<u8> {
        self.hello(&local_hostname(), config.xor, config.hello_timeout)
            .await
    }

    pub async fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        if self.connection.write_packet(packet).await {
            Ok(())
        } else {
            Err(ProtocolError::ConnectionClosed)
        }
    }

    pub async fn read_packet(&mut self) -> Result<Packet> {
        self.connection.read_packet().await
    }

    /// Next packet worth showing to the user. Pings are answered in place.
    pub async fn next_packet(&mut self) -> Result<Packet> {
        loop {
            match self.read_packet().await? {
                Packet::Ping => self.write_packet(&Packet::Ping).await?,
                packet => return Ok(packet),
            }
        }
    }

    pub async fn send_message(&mut self, text: &str) -> Result<()> {
        let packet = Packet::message(self.username.as_str(), text);
        self.write_packet(&packet).await
    }

    pub async fn send_private(&mut self, user: &str, text: &str) -> Result<()> {
        let packet = Packet::target(user, Packet::message(self.username.as_str(), text));
        self.write_packet(&packet).await
    }

    pub async fn request_user_list(&mut self) -> Result<()> {
        self.write_packet(&Packet::GetUserList).await
    }

    pub async fn goodbye(&mut self, reason: &str) -> Result<()> {
        self.write_packet(&Packet::goodbye(reason)).await
    }

    pub fn into_split(self) -> (PacketReader, PacketWriter) {
        self.connection.into_split()
    }
}

/// One line of interactive input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Quit(String),
    List,
    Msg { user: String, text: String },
    Help,
    Say(String),
    Invalid(String),
}

impl ClientCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end();
        if !line.starts_with('/') {
            return ClientCommand::Say(line.to_string());
        }

        let (command, rest) = split_word(line);
        match command.to_lowercase().as_str() {
            "/quit" => ClientCommand::Quit(
                rest.map(str::to_string)
                    .unwrap_or_else(|| DEFAULT_QUIT_MESSAGE.to_string()),
            ),
            "/list" => ClientCommand::List,
            "/help" => ClientCommand::Help,
            "/msg" => match rest.map(split_word) {
                Some((user, Some(text))) => ClientCommand::Msg {
                    user: user.to_string(),
                    text: text.to_string(),
                },
                _ => ClientCommand::Invalid("Invalid msg command".to_string()),
            },
            _ => ClientCommand::Invalid(format!("Unknown command {command}")),
        }
    }

    /// The packet this command sends, if any.
    pub fn to_packet(&self, username: &str) -> Option<Packet> {
        match self {
            ClientCommand::Quit(reason) => Some(Packet::goodbye(reason.as_str())),
            ClientCommand::List => Some(Packet::GetUserList),
            ClientCommand::Msg { user, text } => Some(Packet::target(
                user.as_str(),
                Packet::message(username, text.as_str()),
            )),
            ClientCommand::Say(text) => Some(Packet::message(username, text.as_str())),
            ClientCommand::Help | ClientCommand::Invalid(_) => None,
        }
    }
}

/// First space-delimited word and the (non-empty) remainder.
fn split_word(s: &str) -> (&str, Option<&str>) {
    let s = s.trim_start_matches(' ');
    match s.split_once(' ') {
        Some((first, rest)) => {
            let rest = rest.trim_start_matches(' ');
            (first, (!rest.is_empty()).then_some(rest))
        }
        None => (s, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_line_is_message() {
        assert_eq!(
            ClientCommand::parse("hello there"),
            ClientCommand::Say("hello there".into())
        );
        assert_eq!(
            ClientCommand::parse("hi").to_packet("me"),
            Some(Packet::message("me", "hi"))
        );
    }

    #[test]
    fn test_quit_with_and_without_reason() {
        assert_eq!(
            ClientCommand::parse("/quit"),
            ClientCommand::Quit(DEFAULT_QUIT_MESSAGE.into())
        );
        assert_eq!(
            ClientCommand::parse("/QUIT see you  later"),
            ClientCommand::Quit("see you  later".into())
        );
    }

    #[test]
    fn test_msg_requires_user_and_text() {
        assert_eq!(
            ClientCommand::parse("/msg bob  hey bob"),
            ClientCommand::Msg {
                user: "bob".into(),
                text: "hey bob".into()
            }
        );
        assert!(matches!(
            ClientCommand::parse("/msg bob"),
            ClientCommand::Invalid(_)
        ));
        assert!(matches!(ClientCommand::parse("/msg"), ClientCommand::Invalid(_)));

        let packet = ClientCommand::parse("/msg bob hi").to_packet("alice");
        assert_eq!(
            packet,
            Some(Packet::target("bob", Packet::message("alice", "hi")))
        );
    }

    #[test]
    fn test_other_commands() {
        assert_eq!(ClientCommand::parse("/list"), ClientCommand::List);
        assert_eq!(ClientCommand::parse("/help"), ClientCommand::Help);
        assert_eq!(
            ClientCommand::parse("/dance"),
            ClientCommand::Invalid("Unknown command /dance".into())
        );
        assert_eq!(ClientCommand::Help.to_packet("x"), None);
    }

    #[tokio::test]
    async fn test_resolve_literal_ipv4() {
        let addr = resolve_ipv4("127.0.0.1", 80).await.unwrap();
        assert_eq!(addr, SocketAddrV4::new([127, 0, 0, 1].into(), 80));
    }

    #[tokio::test]
    async fn test_hello_rejected_by_goodbye() {
        let (near, far) = tokio::io::duplex(1024);
        let mut server = Connection::accept_stream(far, true);
        let conn = Connection::connect_stream(near, TransportKind::Binary, true)
            .await
            .unwrap();
        let mut client = ChatClient::from_connection(conn, "alice".into());

        tokio::spawn(async move {
            server.read_packet().await.unwrap();
            server.write_packet(&Packet::goodbye("full")).await;
        });
        let err = client
            .hello("box", false, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::HandshakeRejected(m) if m == "full"));
    }

    #[tokio::test]
    async fn test_hello_unexpected_reply() {
        let (near, far) = tokio::io::duplex(1024);
        let mut server = Connection::accept_stream(far, true);
        let conn = Connection::connect_stream(near, TransportKind::Text, true)
            .await
            .unwrap();
        let mut client = ChatClient::from_connection(conn, "alice".into());

        tokio::spawn(async move {
            server.read_packet().await.unwrap();
            server.write_packet(&Packet::message("x", "y")).await;
        });
        let err = client
            .hello("box", true, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedPacket(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hello_times_out() {
        let (near, far) = tokio::io::duplex(1024);
        let conn = Connection::connect_stream(near, TransportKind::Binary, true)
            .await
            .unwrap();
        let mut client = ChatClient::from_connection(conn, "alice".into());
        let err = client
            .hello("box", false, Duration::from_secs(3))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout));
        drop(far);
    }
}
