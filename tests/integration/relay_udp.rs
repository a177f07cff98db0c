// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::future_not_send,
    clippy::doc_markdown
)]

//! End-to-end tests for the relay over real UDP sockets.
//!
//! Each test starts a relay on `127.0.0.1:0` and drives it with plain
//! `tokio::net::UdpSocket` clients speaking the wire format. The relay
//! routes concurrently, so every test waits for the relay's reply to one
//! step before taking the next.

use std::net::SocketAddr;
use std::time::Duration;

use datachat_proto::codec;
use datachat_proto::frame::{BinaryKind, DEFAULT_MAX_PAYLOAD, Frame};
use datachat_relay::config::RelayConfig;
use datachat_relay::router::NOTICE_SENDER;
use datachat_relay::server::{RelayHandle, start_server};
use tokio::net::UdpSocket;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to listen before concluding nothing was sent.
const QUIET_PERIOD: Duration = Duration::from_millis(200);

// =============================================================================
// Helpers
// =============================================================================

/// A chat participant talking to the relay over its own UDP socket.
struct Client {
    name: String,
    socket: UdpSocket,
    relay: SocketAddr,
}

impl Client {
    async fn new(name: &str, relay: SocketAddr) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        Self {
            name: name.to_string(),
            socket,
            relay,
        }
    }

    /// Connect and wait for the roster that confirms registration.
    async fn join(name: &str, relay: SocketAddr) -> Self {
        let client = Self::new(name, relay).await;
        client
            .send(&Frame::Connect {
                name: name.to_string(),
            })
            .await;
        let roster = client.recv_roster().await;
        assert!(roster.contains(&name.to_string()), "{roster:?}");
        client
    }

    async fn send(&self, frame: &Frame) {
        self.send_raw(&codec::encode(frame, DEFAULT_MAX_PAYLOAD).unwrap())
            .await;
    }

    async fn send_raw(&self, bytes: &[u8]) {
        self.socket.send_to(bytes, self.relay).await.unwrap();
    }

    async fn recv(&self) -> Frame {
        self.try_recv(RECV_TIMEOUT)
            .await
            .unwrap_or_else(|| panic!("{} received nothing", self.name))
    }

    async fn try_recv(&self, wait: Duration) -> Option<Frame> {
        let mut buf = vec![0u8; 65_536];
        let (len, from) = tokio::time::timeout(wait, self.socket.recv_from(&mut buf))
            .await
            .ok()?
            .unwrap();
        assert_eq!(from, self.relay);
        Some(codec::decode(&buf[..len]).unwrap())
    }

    /// Skip frames until a roster arrives and return its sorted names.
    async fn recv_roster(&self) -> Vec<String> {
        loop {
            if let Frame::Roster { mut names } = self.recv().await {
                names.sort();
                return names;
            }
        }
    }

    async fn assert_quiet(&self) {
        let frame = self.try_recv(QUIET_PERIOD).await;
        assert!(frame.is_none(), "{} unexpectedly got {frame:?}", self.name);
    }

    fn text(&self, dest: &str, body: &str) -> Frame {
        Frame::Text {
            sender: self.name.clone(),
            dest: dest.to_string(),
            timestamp: "12:34:56".to_string(),
            body: body.to_string(),
        }
    }
}

async fn start() -> (SocketAddr, RelayHandle) {
    let config = RelayConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        ..RelayConfig::default()
    };
    start_server(&config).await.unwrap()
}

/// Start a relay with alice and bob registered and all join traffic read.
async fn alice_and_bob() -> (SocketAddr, RelayHandle, Client, Client) {
    let (addr, handle) = start().await;
    let alice = Client::join("alice", addr).await;
    let bob = Client::join("bob", addr).await;
    // alice sees bob's join notice, then the two-name roster.
    assert_eq!(alice.recv_roster().await, vec!["alice", "bob"]);
    (addr, handle, alice, bob)
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn join_is_announced_to_existing_sessions() {
    let (addr, handle) = start().await;
    let alice = Client::join("alice", addr).await;
    let _bob = Client::join("bob", addr).await;

    match alice.recv().await {
        Frame::Text {
            sender, dest, body, ..
        } => {
            assert_eq!(sender, NOTICE_SENDER);
            assert_eq!(dest, "TOUS");
            assert_eq!(body, "bob joined the chat");
        }
        other => panic!("expected join notice, got {other:?}"),
    }
    assert_eq!(alice.recv_roster().await, vec!["alice", "bob"]);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn broadcast_text_reaches_everyone_but_sender() {
    let (addr, handle, alice, bob) = alice_and_bob().await;
    let carol = Client::join("carol", addr).await;
    assert_eq!(alice.recv_roster().await.len(), 3);
    assert_eq!(bob.recv_roster().await.len(), 3);

    let hello = alice.text("TOUS", "hi");
    alice.send(&hello).await;

    let expected = alice.text("TOUS", "[12:34:56] alice : hi");
    assert_eq!(bob.recv().await, expected);
    assert_eq!(carol.recv().await, expected);
    alice.assert_quiet().await;

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn private_text_reaches_only_recipient() {
    let (addr, handle, alice, bob) = alice_and_bob().await;
    let carol = Client::join("carol", addr).await;
    assert_eq!(alice.recv_roster().await.len(), 3);
    assert_eq!(bob.recv_roster().await.len(), 3);

    let secret = alice.text("carol", "just you");
    alice.send(&secret).await;

    assert_eq!(
        carol.recv().await,
        alice.text("carol", "[12:34:56] (private from alice) : just you")
    );
    bob.assert_quiet().await;
    alice.assert_quiet().await;

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn text_to_unknown_recipient_is_dropped_silently() {
    let (_addr, handle, alice, bob) = alice_and_bob().await;

    alice.send(&alice.text("nobody", "hello?")).await;

    alice.assert_quiet().await;
    bob.assert_quiet().await;

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn file_payload_arrives_intact() {
    let (_addr, handle, alice, bob) = alice_and_bob().await;

    let payload: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
    let file = Frame::Binary {
        kind: BinaryKind::File,
        sender: "alice".into(),
        dest: "bob".into(),
        filename: "notes.pdf".into(),
        payload,
    };
    alice.send(&file).await;

    assert_eq!(bob.recv().await, file);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn disconnect_announces_leave_and_shrinks_roster() {
    let (_addr, handle, alice, bob) = alice_and_bob().await;

    bob.send(&Frame::Disconnect { name: "bob".into() }).await;

    match alice.recv().await {
        Frame::Text { body, .. } => assert_eq!(body, "bob left the chat"),
        other => panic!("expected leave notice, got {other:?}"),
    }
    assert_eq!(alice.recv_roster().await, vec!["alice"]);
    bob.assert_quiet().await;
    assert_eq!(handle.registry().len(), 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn reconnect_from_new_socket_moves_the_session() {
    let (addr, handle, alice, _old_bob) = alice_and_bob().await;

    let new_bob = Client::join("bob", addr).await;
    assert_eq!(alice.recv_roster().await, vec!["alice", "bob"]);
    assert_eq!(handle.registry().len(), 2);

    let msg = alice.text("bob", "which one?");
    alice.send(&msg).await;
    assert_eq!(
        new_bob.recv().await,
        alice.text("bob", "[12:34:56] (private from alice) : which one?")
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn malformed_datagram_does_not_stop_the_relay() {
    let (addr, handle) = start().await;
    let stranger = Client::new("stranger", addr).await;

    stranger.send_raw(&[0x00, 0x04, b'P', b'I', b'N', b'G']).await;
    stranger.send_raw(&[0xff]).await;

    // The relay still serves well-formed traffic afterwards.
    let alice = Client::join("alice", addr).await;
    assert_eq!(
        handle.registry().lookup("alice"),
        Some(alice.socket.local_addr().unwrap())
    );

    // Workers run concurrently, so the rejects may be counted after the join.
    tokio::time::timeout(RECV_TIMEOUT, async {
        while handle.stats().counts().malformed < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("both malformed datagrams counted");

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn concurrent_connects_register_every_name() {
    let (addr, handle) = start().await;

    let joins: Vec<_> = (0..20)
        .map(|i| tokio::spawn(async move { Client::join(&format!("user-{i}"), addr).await }))
        .collect();
    let mut clients = Vec::new();
    for join in joins {
        clients.push(join.await.unwrap());
    }

    assert_eq!(handle.registry().len(), 20);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_stops_serving() {
    let (addr, handle) = start().await;
    let alice = Client::join("alice", addr).await;

    handle.shutdown().await.unwrap();

    alice.send(&alice.text("TOUS", "anyone?")).await;
    alice.assert_quiet().await;
}
