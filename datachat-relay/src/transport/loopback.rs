//! Loopback transport for testing.
//!
//! Incoming datagrams are injected through a [`LoopbackInjector`]; outgoing
//! datagrams are recorded so tests can inspect exactly what the relay sent
//! and to whom. Any endpoint can be marked unreachable, after which sends to
//! it fail the way a dead UDP peer would surface through the OS.

use std::collections::HashSet;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use super::{DatagramTransport, Endpoint, TransportError};

/// One datagram captured on its way out of the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentDatagram {
    /// Destination address.
    pub to: Endpoint,
    /// Encoded frame bytes.
    pub bytes: Vec<u8>,
}

/// In-process transport backed by a [`tokio::sync::mpsc`] channel.
///
/// Dropping every [`LoopbackInjector`] closes the channel, and the next
/// `recv_from` fails with [`TransportError::ReceiveFailed`], mirroring a
/// closed socket.
pub struct LoopbackTransport {
    inbound: AsyncMutex<mpsc::Receiver<(Vec<u8>, Endpoint)>>,
    sent: Mutex<Vec<SentDatagram>>,
    unreachable: Mutex<HashSet<Endpoint>>,
}

/// Feeds datagrams into a [`LoopbackTransport`].
#[derive(Clone)]
pub struct LoopbackInjector {
    tx: mpsc::Sender<(Vec<u8>, Endpoint)>,
}

impl LoopbackTransport {
    /// Create a transport and the injector that feeds it.
    ///
    /// `buffer` is the number of datagrams that can wait unread.
    #[must_use]
    pub fn new(buffer: usize) -> (Self, LoopbackInjector) {
        let (tx, rx) = mpsc::channel(buffer);
        let transport = Self {
            inbound: AsyncMutex::new(rx),
            sent: Mutex::new(Vec::new()),
            unreachable: Mutex::new(HashSet::new()),
        };
        (transport, LoopbackInjector { tx })
    }

    /// Make every later send to `addr` fail.
    pub fn set_unreachable(&self, addr: Endpoint) {
        self.unreachable.lock().insert(addr);
    }

    /// Make `addr` reachable again.
    pub fn set_reachable(&self, addr: Endpoint) {
        self.unreachable.lock().remove(&addr);
    }

    /// Remove and return everything sent so far.
    pub fn take_sent(&self) -> Vec<SentDatagram> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Copy of everything sent so far, leaving the record intact.
    #[must_use]
    pub fn sent(&self) -> Vec<SentDatagram> {
        self.sent.lock().clone()
    }

    /// Datagrams sent to one destination, in send order.
    #[must_use]
    pub fn sent_to(&self, addr: Endpoint) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .iter()
            .filter(|d| d.to == addr)
            .map(|d| d.bytes.clone())
            .collect()
    }
}

impl LoopbackInjector {
    /// Deliver `datagram` to the transport as if it came from `from`.
    ///
    /// # Errors
    ///
    /// Returns the datagram back if the transport has been dropped.
    pub async fn inject(&self, datagram: Vec<u8>, from: Endpoint) -> Result<(), Vec<u8>> {
        self.tx
            .send((datagram, from))
            .await
            .map_err(|e| e.0.0)
    }
}

impl DatagramTransport for LoopbackTransport {
    async fn send_to(&self, datagram: &[u8], addr: Endpoint) -> Result<(), TransportError> {
        if self.unreachable.lock().contains(&addr) {
            return Err(TransportError::SendFailed {
                addr,
                source: std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "endpoint marked unreachable",
                ),
            });
        }
        self.sent.lock().push(SentDatagram {
            to: addr,
            bytes: datagram.to_vec(),
        });
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Endpoint), TransportError> {
        let next = self.inbound.lock().await.recv().await;
        let Some((datagram, from)) = next else {
            return Err(TransportError::ReceiveFailed(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "loopback closed",
            )));
        };
        // Like a UDP socket, excess bytes beyond the buffer are discarded.
        let len = datagram.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram[..len]);
        Ok((len, from))
    }
}
