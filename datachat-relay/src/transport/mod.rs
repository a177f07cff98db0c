//! Datagram transport abstraction for the relay.
//!
//! Defines the [`DatagramTransport`] trait the dispatcher and router are
//! generic over. Implementations:
//! - [`tokio::net::UdpSocket`]: the production transport
//! - [`loopback::LoopbackTransport`]: in-process transport for tests, able
//!   to simulate failed sends

pub mod loopback;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

/// Network address a session's datagrams currently originate from.
pub type Endpoint = SocketAddr;

/// Errors that can occur on the datagram transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A single outbound datagram could not be handed to the network.
    ///
    /// Recoverable: the relay treats it as evidence that the destination
    /// is gone.
    #[error("send to {addr} failed: {source}")]
    SendFailed {
        /// Destination of the failed send.
        addr: Endpoint,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The listening socket can no longer receive. Fatal for the relay.
    #[error("receive failed: {0}")]
    ReceiveFailed(std::io::Error),
}

/// Async, connectionless datagram transport.
///
/// Sends are fire-and-forget: `Ok(())` means the datagram left this host,
/// not that anyone received it.
pub trait DatagramTransport: Send + Sync + 'static {
    /// Send one datagram to `addr`.
    fn send_to(
        &self,
        datagram: &[u8],
        addr: Endpoint,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Wait for the next datagram, writing it into `buf`.
    ///
    /// Returns the number of bytes written and the source address.
    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<(usize, Endpoint), TransportError>> + Send;
}

impl DatagramTransport for UdpSocket {
    async fn send_to(&self, datagram: &[u8], addr: Endpoint) -> Result<(), TransportError> {
        let sent = Self::send_to(self, datagram, addr)
            .await
            .map_err(|source| TransportError::SendFailed { addr, source })?;
        if sent == datagram.len() {
            Ok(())
        } else {
            Err(TransportError::SendFailed {
                addr,
                source: std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    format!("short send: {sent} of {} bytes", datagram.len()),
                ),
            })
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Endpoint), TransportError> {
        Self::recv_from(self, buf)
            .await
            .map_err(TransportError::ReceiveFailed)
    }
}

impl<T: DatagramTransport> DatagramTransport for Arc<T> {
    async fn send_to(&self, datagram: &[u8], addr: Endpoint) -> Result<(), TransportError> {
        self.as_ref().send_to(datagram, addr).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Endpoint), TransportError> {
        self.as_ref().recv_from(buf).await
    }
}
