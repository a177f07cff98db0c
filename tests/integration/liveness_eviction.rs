// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::future_not_send
)]

//! Liveness by send failure, exercised through a full relay instance.
//!
//! The relay runs on a [`LoopbackTransport`] so tests can inject frames
//! from arbitrary endpoints and make any endpoint unreachable. Frames are
//! injected one at a time and each test waits for the relay's reaction
//! before the next step, since the worker pool processes frames in
//! parallel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use datachat_proto::codec;
use datachat_proto::frame::{DEFAULT_MAX_PAYLOAD, Frame};
use datachat_relay::config::RelayConfig;
use datachat_relay::server::{RelayHandle, RelayServer};
use datachat_relay::transport::loopback::{LoopbackInjector, LoopbackTransport};

const WAIT: Duration = Duration::from_secs(5);

const ALICE: u16 = 4001;
const BOB: u16 = 4002;
const CAROL: u16 = 4003;

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

struct Harness {
    transport: Arc<LoopbackTransport>,
    injector: LoopbackInjector,
    handle: RelayHandle,
}

impl Harness {
    fn start() -> Self {
        let (transport, injector) = LoopbackTransport::new(64);
        let transport = Arc::new(transport);
        let handle =
            RelayServer::with_transport(Arc::clone(&transport), &RelayConfig::default()).spawn();
        Self {
            transport,
            injector,
            handle,
        }
    }

    async fn inject(&self, frame: &Frame, port: u16) {
        let bytes = codec::encode(frame, DEFAULT_MAX_PAYLOAD).unwrap();
        self.injector.inject(bytes, addr(port)).await.unwrap();
    }

    async fn connect(&self, name: &str, port: u16) {
        self.inject(&Frame::Connect { name: name.into() }, port).await;
        self.wait_until(|h| h.handle.registry().lookup(name) == Some(addr(port)))
            .await;
        // The connect's roster publish must finish before the next step.
        self.wait_until(|h| h.last_roster_to(port).is_some_and(|names| names.contains(&name.to_string())))
            .await;
    }

    fn frames_to(&self, port: u16) -> Vec<Frame> {
        self.transport
            .sent_to(addr(port))
            .iter()
            .map(|b| codec::decode(b).unwrap())
            .collect()
    }

    fn last_roster_to(&self, port: u16) -> Option<Vec<String>> {
        self.frames_to(port).into_iter().rev().find_map(|f| match f {
            Frame::Roster { names } => Some(names),
            _ => None,
        })
    }

    async fn wait_until(&self, condition: impl Fn(&Self) -> bool) {
        tokio::time::timeout(WAIT, async {
            while !condition(self) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }
}

fn text(sender: &str, dest: &str, body: &str) -> Frame {
    Frame::Text {
        sender: sender.into(),
        dest: dest.into(),
        timestamp: "09:30:00".into(),
        body: body.into(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unreachable_session_is_evicted_on_next_broadcast() {
    let h = Harness::start();
    h.connect("alice", ALICE).await;
    h.connect("bob", BOB).await;
    assert_eq!(h.handle.registry().names(), vec!["alice", "bob"]);

    let hi = text("alice", "TOUS", "hi");
    h.inject(&hi, ALICE).await;
    let relayed = text("alice", "TOUS", "[09:30:00] alice : hi");
    h.wait_until(|h| h.frames_to(BOB).contains(&relayed)).await;
    assert!(!h.frames_to(ALICE).contains(&relayed));

    h.transport.set_unreachable(addr(BOB));
    h.transport.take_sent();
    h.inject(&text("alice", "TOUS", "still there?"), ALICE).await;

    h.wait_until(|h| h.handle.registry().lookup("bob").is_none())
        .await;
    h.wait_until(|h| h.last_roster_to(ALICE) == Some(vec!["alice".to_string()]))
        .await;
    assert_eq!(h.handle.registry().names(), vec!["alice"]);

    h.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn evicted_session_receives_nothing_afterwards() {
    let h = Harness::start();
    h.connect("alice", ALICE).await;
    h.connect("bob", BOB).await;
    h.connect("carol", CAROL).await;

    h.transport.set_unreachable(addr(BOB));
    h.inject(&text("alice", "bob", "ping"), ALICE).await;
    h.wait_until(|h| h.handle.registry().lookup("bob").is_none())
        .await;
    h.wait_until(|h| h.last_roster_to(CAROL).is_some_and(|names| names.len() == 2))
        .await;

    h.transport.set_reachable(addr(BOB));
    h.transport.take_sent();
    h.inject(&text("alice", "TOUS", "later"), ALICE).await;
    let relayed = text("alice", "TOUS", "[09:30:00] alice : later");
    h.wait_until(|h| h.frames_to(CAROL).contains(&relayed)).await;
    assert!(h.frames_to(BOB).is_empty());

    h.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reconnect_after_eviction_restores_the_session() {
    let h = Harness::start();
    h.connect("alice", ALICE).await;
    h.connect("bob", BOB).await;

    h.transport.set_unreachable(addr(BOB));
    h.inject(&text("alice", "TOUS", "hi"), ALICE).await;
    h.wait_until(|h| h.handle.registry().lookup("bob").is_none())
        .await;

    // bob comes back from a new endpoint.
    h.connect("bob", 4012).await;
    h.wait_until(|h| {
        h.last_roster_to(ALICE) == Some(vec!["alice".to_string(), "bob".to_string()])
    })
    .await;
    assert_eq!(h.handle.registry().lookup("bob"), Some(addr(4012)));

    h.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn everyone_unreachable_empties_the_registry() {
    let h = Harness::start();
    h.connect("alice", ALICE).await;
    h.connect("bob", BOB).await;
    h.connect("carol", CAROL).await;

    h.transport.set_unreachable(addr(BOB));
    h.transport.set_unreachable(addr(CAROL));
    h.inject(&text("alice", "TOUS", "anyone?"), ALICE).await;

    h.wait_until(|h| h.handle.registry().len() == 1).await;
    assert_eq!(h.handle.registry().names(), vec!["alice"]);
    h.wait_until(|h| h.last_roster_to(ALICE) == Some(vec!["alice".to_string()]))
        .await;

    h.handle.shutdown().await.unwrap();
}
