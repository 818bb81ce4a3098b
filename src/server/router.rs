//! Packet routing over the client registry.
//!
//! The router never adds or removes clients. It is handed the client that
//! sent a packet plus every other live client for the duration of one
//! dispatch, and reports whether the sender's connection should stay open.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::connection::{Endpoint, PacketWriter};
use crate::core::packet::{Packet, UserListEntry};

/// Username used for server-originated announcements.
pub const SERVER_USERNAME: &str = "Server";

/// Reply to a client's Goodbye.
pub const FAREWELL: &str = "Don't let the door hit you on the way out!";

pub fn join_announcement(hostname: &str) -> String {
    format!("I've just joined from {hostname}")
}

pub fn quit_announcement(username: &str, reason: &str) -> String {
    format!("'{username}' has quit, they said '{reason}'")
}

/// One registered peer.
pub struct ClientEntry {
    pub id: u64,
    pub username: String,
    pub hostname: String,
    /// Set once the client has sent Hello.
    pub identified: bool,
    pub endpoint: Endpoint,
    pub writer: PacketWriter,
}

impl ClientEntry {
    pub fn new(id: u64, endpoint: Endpoint, writer: PacketWriter) -> Self {
        Self {
            id,
            username: format!("User_{}", endpoint.remote),
            hostname: endpoint.remote.clone(),
            identified: false,
            endpoint,
            writer,
        }
    }

    fn user_list_entry(&self) -> Option<UserListEntry> {
        self.identified
            .then(|| UserListEntry::new(&self.username, &self.hostname))
    }
}

pub struct Router {
    rng: StdRng,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Deterministic key selection for tests.
    pub fn with_rng(rng: StdRng) -> Self {
        Self { rng }
    }

    /// Handle one packet from `client`. Returns `false` when the client's
    /// connection should be closed.
    pub async fn dispatch(
        &mut self,
        client: &mut ClientEntry,
        others: &mut [&mut ClientEntry],
        packet: Packet,
    ) -> bool {
        match packet {
            Packet::Hello {
                username,
                hostname,
                xor_key,
            } => {
                info!(user = %username, host = %hostname, "Hello");
                client.username = username;
                client.hostname = hostname;
                client.identified = true;

                let key = if xor_key.is_some() {
                    self.rng.random::<u8>()
                } else {
                    0
                };
                let written = client.writer.write_packet(&Packet::ReKey { xor_key: key }).await;
                client.writer.set_key(key);

                let announcement =
                    Packet::message(client.username.as_str(), join_announcement(&client.hostname));
                broadcast(others, &announcement).await;
                written
            }
            Packet::Message { .. } => {
                broadcast(others, &packet).await;
                true
            }
            Packet::GetUserList => {
                let entries = others
                    .iter()
                    .filter_map(|c| c.user_list_entry())
                    .collect();
                client
                    .writer
                    .write_packet(&Packet::UserList { entries })
                    .await
            }
            Packet::Target {
                destination,
                packet,
            } => {
                match others.iter_mut().find(|c| c.username == destination) {
                    Some(target) => {
                        if !target.writer.write_packet(&packet).await {
                            debug!(user = %destination, "write to target failed");
                        }
                    }
                    None => debug!(user = %destination, "no such target user"),
                }
                true
            }
            Packet::Goodbye { message } => {
                client.writer.write_packet(&Packet::goodbye(FAREWELL)).await;
                info!(user = %client.username, reason = %message, "Goodbye");
                let announcement = Packet::message(
                    SERVER_USERNAME,
                    quit_announcement(&client.username, &message),
                );
                broadcast(others, &announcement).await;
                false
            }
            other => {
                debug!(command = other.command().name(), "ignored");
                true
            }
        }
    }
}

async fn broadcast(others: &mut [&mut ClientEntry], packet: &Packet) {
    for other in others.iter_mut() {
        if !other.writer.write_packet(packet).await {
            debug!(user = %other.username, "broadcast write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::transport::negotiate::TransportKind;

    struct Harness {
        entry: ClientEntry,
        remote: Connection,
    }

    async fn client(id: u64) -> Harness {
        let (near, far) = tokio::io::duplex(4096);
        let server_side = Connection::accept_stream(near, true);
        let mut remote = Connection::connect_stream(far, TransportKind::Binary, true)
            .await
            .unwrap();
        let (mut reader, writer) = server_side.into_split();
        // Push a packet through so the server side negotiates.
        assert!(remote.write_packet(&Packet::Ping).await);
        reader.read_packet().await.unwrap();

        Harness {
            entry: ClientEntry::new(id, Endpoint::new(format!("10.0.0.{id}:1"), "TCP"), writer),
            remote,
        }
    }

    fn router() -> Router {
        Router::with_rng(StdRng::seed_from_u64(7))
    }

    #[test]
    fn test_announcements() {
        assert_eq!(join_announcement("box"), "I've just joined from box");
        assert_eq!(
            quit_announcement("bob", "bye"),
            "'bob' has quit, they said 'bye'"
        );
    }

    #[tokio::test]
    async fn test_placeholder_identity() {
        let a = client(4).await;
        assert_eq!(a.entry.username, "User_10.0.0.4:1");
        assert_eq!(a.entry.hostname, "10.0.0.4:1");
        assert!(!a.entry.identified);
    }

    #[tokio::test]
    async fn test_message_goes_to_others_only() {
        let mut a = client(1).await;
        let mut b = client(2).await;
        let mut c = client(3).await;

        let keep = router()
            .dispatch(
                &mut a.entry,
                &mut [&mut b.entry, &mut c.entry],
                Packet::message("a", "hi"),
            )
            .await;
        assert!(keep);
        assert_eq!(b.remote.read_packet().await.unwrap(), Packet::message("a", "hi"));
        assert_eq!(c.remote.read_packet().await.unwrap(), Packet::message("a", "hi"));
    }

    #[tokio::test]
    async fn test_hello_without_upgrade_rekeys_to_zero() {
        let mut a = client(1).await;
        let mut b = client(2).await;

        let keep = router()
            .dispatch(
                &mut a.entry,
                &mut [&mut b.entry],
                Packet::hello("alice", "box", false),
            )
            .await;
        assert!(keep);
        assert_eq!(a.entry.username, "alice");
        assert_eq!(a.entry.writer.key(), 0);
        assert_eq!(
            a.remote.read_packet().await.unwrap(),
            Packet::ReKey { xor_key: 0 }
        );
        assert_eq!(
            b.remote.read_packet().await.unwrap(),
            Packet::message("alice", "I've just joined from box")
        );
    }

    #[tokio::test]
    async fn test_hello_with_upgrade_applies_key_both_ways() {
        let mut a = client(1).await;
        assert!(
            router()
                .dispatch(&mut a.entry, &mut [], Packet::hello("alice", "box", true))
                .await
        );

        let key = match a.remote.read_packet().await.unwrap() {
            Packet::ReKey { xor_key } => xor_key,
            other => panic!("expected ReKey, got {other:?}"),
        };
        assert_eq!(a.entry.writer.key(), key);
        a.remote.set_key(key);

        let packet = Packet::message("Server", "after rekey");
        assert!(a.entry.writer.write_packet(&packet).await);
        assert_eq!(a.remote.read_packet().await.unwrap(), packet);
    }

    #[tokio::test]
    async fn test_user_list_excludes_unidentified() {
        let mut a = client(1).await;
        let mut b = client(2).await;
        let mut c = client(3).await;
        b.entry.username = "bob".into();
        b.entry.hostname = "bhost".into();
        b.entry.identified = true;

        router()
            .dispatch(
                &mut a.entry,
                &mut [&mut b.entry, &mut c.entry],
                Packet::GetUserList,
            )
            .await;
        assert_eq!(
            a.remote.read_packet().await.unwrap(),
            Packet::UserList {
                entries: vec![UserListEntry::new("bob", "bhost")]
            }
        );
    }

    #[tokio::test]
    async fn test_target_unknown_user_is_silent() {
        let mut a = client(1).await;
        let mut b = client(2).await;
        let keep = router()
            .dispatch(
                &mut a.entry,
                &mut [&mut b.entry],
                Packet::target("nobody", Packet::message("a", "psst")),
            )
            .await;
        assert!(keep);

        // b sees nothing; the next thing it gets is this marker.
        assert!(b.entry.writer.write_packet(&Packet::Ping).await);
        assert_eq!(b.remote.read_packet().await.unwrap(), Packet::Ping);
    }

    #[tokio::test]
    async fn test_target_write_failure_keeps_sender_open() {
        let mut a = client(1).await;
        let b = client(2).await;
        let Harness {
            entry: mut bob,
            remote,
        } = b;
        bob.username = "bob".into();
        drop(remote);
        assert!(!bob.writer.write_packet(&Packet::Ping).await);

        let keep = router()
            .dispatch(
                &mut a.entry,
                &mut [&mut bob],
                Packet::target("bob", Packet::message("a", "psst")),
            )
            .await;
        assert!(keep, "a failed delivery must not close the sender");

        assert!(a.entry.writer.write_packet(&Packet::Ping).await);
        assert_eq!(a.remote.read_packet().await.unwrap(), Packet::Ping);
    }

    #[tokio::test]
    async fn test_goodbye_closes_and_announces() {
        let mut a = client(1).await;
        let mut b = client(2).await;
        a.entry.username = "alice".into();

        let keep = router()
            .dispatch(&mut a.entry, &mut [&mut b.entry], Packet::goodbye("cya"))
            .await;
        assert!(!keep);
        assert_eq!(a.remote.read_packet().await.unwrap(), Packet::goodbye(FAREWELL));
        assert_eq!(
            b.remote.read_packet().await.unwrap(),
            Packet::message("Server", "'alice' has quit, they said 'cya'")
        );
    }

    #[tokio::test]
    async fn test_ping_is_noop() {
        let mut a = client(1).await;
        assert!(router().dispatch(&mut a.entry, &mut [], Packet::Ping).await);
    }
}
