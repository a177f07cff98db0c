//! Frame routing: registration, relaying, and liveness by send failure.
//!
//! The relay has no heartbeat. A session that vanishes without sending
//! `DISCONNECT` is only noticed when a send to it fails, at which point it
//! is evicted and the remaining sessions receive a new roster.
//!
//! Every fan-out works from a registry snapshot: the lock is held only to
//! copy the map, never while datagrams are in flight.

use std::borrow::Cow;
use std::sync::Arc;

use datachat_proto::codec;
use datachat_proto::frame::{self, Frame, ROSTER_SEPARATOR};

use crate::registry::SessionRegistry;
use crate::roster::RosterBroadcaster;
use crate::transport::{DatagramTransport, Endpoint};

/// Sender name used for join and leave notices.
pub const NOTICE_SENDER: &str = "SERVER";

/// Routing parameters taken from the relay configuration.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    /// Largest binary payload the relay will forward.
    pub max_payload: usize,
    /// Destination meaning "everyone except the sender".
    pub broadcast_token: String,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            max_payload: frame::DEFAULT_MAX_PAYLOAD,
            broadcast_token: frame::DEFAULT_BROADCAST_TOKEN.to_string(),
        }
    }
}

/// Summary of what routing one frame did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteOutcome {
    /// Number of sessions the frame itself (or its notice) reached.
    pub delivered: usize,
    /// Sessions evicted while handling the frame, in eviction order.
    pub evicted: Vec<String>,
}

/// Result of sending one datagram to a set of sessions.
#[derive(Debug, Default)]
pub struct Delivery {
    /// Sends that succeeded.
    pub delivered: usize,
    /// Sessions whose send failed, with the endpoint that failed.
    pub failed: Vec<(String, Endpoint)>,
}

/// Sends `datagram` to every target, collecting the failures.
///
/// Never stops early: one unreachable session does not affect the rest.
pub async fn deliver<T: DatagramTransport>(
    transport: &T,
    datagram: &[u8],
    targets: &[(String, Endpoint)],
) -> Delivery {
    let mut delivery = Delivery::default();
    for (name, endpoint) in targets {
        match transport.send_to(datagram, *endpoint).await {
            Ok(()) => delivery.delivered += 1,
            Err(e) => {
                tracing::warn!(name = %name, addr = %endpoint, error = %e, "send failed");
                delivery.failed.push((name.clone(), *endpoint));
            }
        }
    }
    delivery
}

/// Rewrites a text body into the line recipients display.
///
/// Broadcasts read `[ts] sender : body`, private messages
/// `[ts] (private from sender) : body`. Binary frames pass through untouched.
fn format_for_delivery(frame: &Frame, broadcast: bool) -> Cow<'_, Frame> {
    let Frame::Text {
        sender,
        dest,
        timestamp,
        body,
    } = frame
    else {
        return Cow::Borrowed(frame);
    };
    let body = if broadcast {
        format!("[{timestamp}] {sender} : {body}")
    } else {
        format!("[{timestamp}] (private from {sender}) : {body}")
    };
    Cow::Owned(Frame::Text {
        sender: sender.clone(),
        dest: dest.clone(),
        timestamp: timestamp.clone(),
        body,
    })
}

/// Why a `CONNECT` was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NameRejection {
    /// The name contains the roster separator and could never be listed.
    #[error("name contains the roster separator")]
    ContainsSeparator,
    /// The name would be read as the broadcast destination.
    #[error("name is the broadcast token")]
    BroadcastToken,
    /// The name would impersonate relay notices.
    #[error("name is reserved for relay notices")]
    Reserved,
}

/// Applies frames to the registry and relays them to their destinations.
pub struct Router<T> {
    registry: Arc<SessionRegistry>,
    transport: Arc<T>,
    roster: RosterBroadcaster<T>,
    settings: RouterSettings,
}

impl<T: DatagramTransport> Router<T> {
    /// Creates a router over a shared registry and transport.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, transport: Arc<T>, settings: RouterSettings) -> Self {
        let roster = RosterBroadcaster::new(
            Arc::clone(&registry),
            Arc::clone(&transport),
            settings.max_payload,
        );
        Self {
            registry,
            transport,
            roster,
            settings,
        }
    }

    /// The registry this router mutates.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Handles one decoded frame that arrived from `from`.
    pub async fn route(&self, frame: Frame, from: Endpoint) -> RouteOutcome {
        match frame {
            Frame::Connect { name } => self.connect(&name, from).await,
            Frame::Disconnect { name } => self.disconnect(&name).await,
            Frame::Text { .. } | Frame::Binary { .. } => self.relay(&frame).await,
            Frame::Roster { .. } => {
                tracing::debug!(addr = %from, "ignoring roster frame from client");
                RouteOutcome::default()
            }
        }
    }

    /// Checks that `name` can be registered.
    ///
    /// # Errors
    ///
    /// Returns a [`NameRejection`] for names that could never be listed,
    /// addressed, or told apart from relay notices.
    pub fn validate_name(&self, name: &str) -> Result<(), NameRejection> {
        if name.contains(ROSTER_SEPARATOR) {
            Err(NameRejection::ContainsSeparator)
        } else if frame::is_broadcast(name, &self.settings.broadcast_token) {
            Err(NameRejection::BroadcastToken)
        } else if name == NOTICE_SENDER {
            Err(NameRejection::Reserved)
        } else {
            Ok(())
        }
    }

    async fn connect(&self, name: &str, from: Endpoint) -> RouteOutcome {
        if let Err(reason) = self.validate_name(name) {
            tracing::warn!(name = %name, addr = %from, %reason, "refusing connect");
            return RouteOutcome::default();
        }

        match self.registry.upsert(name, from) {
            Some(previous) => {
                tracing::info!(name = %name, addr = %from, previous = %previous, "session refreshed");
            }
            None => tracing::info!(name = %name, addr = %from, "session joined"),
        }

        let mut outcome = self.notify(name, &format!("{name} joined the chat")).await;
        outcome.evicted.extend(self.roster.publish().await);
        outcome
    }

    async fn disconnect(&self, name: &str) -> RouteOutcome {
        if !self.registry.remove(name) {
            tracing::debug!(name = %name, "disconnect for unknown session");
            return RouteOutcome::default();
        }
        tracing::info!(name = %name, "session left");

        let mut outcome = self.notify(name, &format!("{name} left the chat")).await;
        outcome.evicted.extend(self.roster.publish().await);
        outcome
    }

    /// Broadcasts a relay notice about `subject` to everyone else.
    ///
    /// Evictions found here are folded into the roster publish the caller
    /// runs next, so no separate roster pass is issued.
    async fn notify(&self, subject: &str, body: &str) -> RouteOutcome {
        let notice = Frame::Text {
            sender: NOTICE_SENDER.to_string(),
            dest: self.settings.broadcast_token.clone(),
            timestamp: chrono::Local::now().format("%H:%M:%S").to_string(),
            body: body.to_string(),
        };
        let Some(datagram) = self.encode(&notice) else {
            return RouteOutcome::default();
        };
        let delivery = self.fan_out(&datagram, Some(subject)).await;
        RouteOutcome {
            delivered: delivery.delivered,
            evicted: self.registry.evict(&delivery.failed),
        }
    }

    async fn relay(&self, frame: &Frame) -> RouteOutcome {
        let Some((sender, dest)) = frame.route() else {
            return RouteOutcome::default();
        };
        let broadcast = frame::is_broadcast(dest, &self.settings.broadcast_token);
        let Some(datagram) = self.encode(&format_for_delivery(frame, broadcast)) else {
            return RouteOutcome::default();
        };

        if broadcast {
            tracing::debug!(sender = %sender, kind = frame.tag(), "broadcasting");
            let delivery = self.fan_out(&datagram, Some(sender)).await;
            self.settle(delivery).await
        } else if let Some(endpoint) = self.registry.lookup(dest) {
            tracing::debug!(sender = %sender, dest = %dest, kind = frame.tag(), "unicasting");
            let targets = [(dest.to_string(), endpoint)];
            let delivery = deliver(self.transport.as_ref(), &datagram, &targets).await;
            self.settle(delivery).await
        } else {
            // No reverse channel exists to tell the sender.
            tracing::debug!(sender = %sender, dest = %dest, "unknown destination, dropping");
            RouteOutcome::default()
        }
    }

    /// Sends to every registered session except `exclude`.
    async fn fan_out(&self, datagram: &[u8], exclude: Option<&str>) -> Delivery {
        let targets: Vec<_> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|(name, _)| Some(name.as_str()) != exclude)
            .collect();
        deliver(self.transport.as_ref(), datagram, &targets).await
    }

    /// Evicts failed sessions as one batch, then publishes one roster if
    /// anything was evicted.
    async fn settle(&self, delivery: Delivery) -> RouteOutcome {
        let mut evicted = self.registry.evict(&delivery.failed);
        for name in &evicted {
            tracing::info!(name = %name, "session evicted after failed send");
        }
        if !evicted.is_empty() {
            let more = self.roster.publish().await;
            evicted.extend(more);
        }
        RouteOutcome {
            delivered: delivery.delivered,
            evicted,
        }
    }

    fn encode(&self, frame: &Frame) -> Option<Vec<u8>> {
        match codec::encode(frame, self.settings.max_payload) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                // An oversize frame says nothing about the destination's liveness.
                tracing::warn!(kind = frame.tag(), error = %e, "cannot relay frame");
                None
            }
        }
    }
}
