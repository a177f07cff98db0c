//! Roster broadcasting.
//!
//! After any membership change every registered session, including the one
//! that caused the change, receives a fresh [`Frame::Roster`].

use std::sync::Arc;

use datachat_proto::codec;
use datachat_proto::frame::Frame;

use crate::registry::SessionRegistry;
use crate::router::deliver;
use crate::transport::{DatagramTransport, Endpoint};

/// Builds and sends roster frames from the shared registry.
pub struct RosterBroadcaster<T> {
    registry: Arc<SessionRegistry>,
    transport: Arc<T>,
    max_payload: usize,
}

impl<T: DatagramTransport> RosterBroadcaster<T> {
    /// Creates a broadcaster over `registry`, sending through `transport`.
    #[must_use]
    pub const fn new(registry: Arc<SessionRegistry>, transport: Arc<T>, max_payload: usize) -> Self {
        Self {
            registry,
            transport,
            max_payload,
        }
    }

    /// Sends the roster to every session and evicts the ones that fail.
    ///
    /// If the first pass evicts anyone, exactly one more pass runs so the
    /// survivors see the shrunken list. Sessions failing that second pass
    /// are evicted as well, but no third pass follows; they are already
    /// absent from the list the survivors hold. Returns every evicted name.
    pub async fn publish(&self) -> Vec<String> {
        let mut evicted = self.publish_once().await;
        if !evicted.is_empty() {
            tracing::debug!(evicted = evicted.len(), "re-publishing roster after eviction");
            evicted.extend(self.publish_once().await);
        }
        evicted
    }

    async fn publish_once(&self) -> Vec<String> {
        let targets = self.registry.snapshot();
        if targets.is_empty() {
            return Vec::new();
        }

        let datagram = match codec::encode(&roster_of(&targets), self.max_payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, sessions = targets.len(), "failed to encode roster");
                return Vec::new();
            }
        };

        let delivery = deliver(self.transport.as_ref(), &datagram, &targets).await;
        tracing::debug!(
            delivered = delivery.delivered,
            failed = delivery.failed.len(),
            "roster published"
        );

        let evicted = self.registry.evict(&delivery.failed);
        for name in &evicted {
            tracing::info!(name = %name, "session evicted after failed roster send");
        }
        evicted
    }
}

/// Names are sorted so the frame is stable for a given membership.
fn roster_of(sessions: &[(String, Endpoint)]) -> Frame {
    let mut names: Vec<String> = sessions.iter().map(|(name, _)| name.clone()).collect();
    names.sort_unstable();
    Frame::Roster { names }
}
