//! Relay server context.
//!
//! A [`RelayServer`] owns everything one relay instance needs: the session
//! registry, the transport, the router, and the dispatcher. Nothing is
//! global, so several relays can run side by side in one process.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::config::{ConfigError, RelayConfig};
use crate::dispatcher::{DispatchStats, Dispatcher, ShutdownHandle};
use crate::registry::SessionRegistry;
use crate::router::Router;
use crate::transport::{DatagramTransport, TransportError};

/// Errors that stop a relay from starting or finishing cleanly.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The UDP socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was attempted.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The receive loop ended because the transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The relay task panicked or was cancelled.
    #[error("relay task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// One relay instance, ready to run.
pub struct RelayServer<T> {
    registry: Arc<SessionRegistry>,
    dispatcher: Dispatcher<T>,
}

impl RelayServer<UdpSocket> {
    /// Binds a UDP socket at `config.bind_addr` and builds a relay on it.
    ///
    /// Returns the server and the address actually bound, which differs
    /// from the configured one when binding port 0.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] for an invalid configuration and
    /// [`ServerError::Bind`] if the socket cannot be bound.
    pub async fn bind(config: &RelayConfig) -> Result<(Self, SocketAddr), ServerError> {
        config.validate()?;
        let bind_err = |source| ServerError::Bind {
            addr: config.bind_addr.clone(),
            source,
        };
        let socket = UdpSocket::bind(&config.bind_addr).await.map_err(bind_err)?;
        let local_addr = socket.local_addr().map_err(bind_err)?;
        Ok((Self::with_transport(socket, config), local_addr))
    }
}

impl<T: DatagramTransport> RelayServer<T> {
    /// Builds a relay over an already-open transport.
    #[must_use]
    pub fn with_transport(transport: T, config: &RelayConfig) -> Self {
        let transport = Arc::new(transport);
        let registry = Arc::new(SessionRegistry::new());
        let router = Arc::new(Router::new(
            Arc::clone(&registry),
            Arc::clone(&transport),
            config.router_settings(),
        ));
        let dispatcher = Dispatcher::new(transport, router, config.pool_settings());
        Self {
            registry,
            dispatcher,
        }
    }

    /// The relay's session registry.
    #[must_use]
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Handle that stops the relay.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.dispatcher.shutdown_handle()
    }

    /// Dispatch counters.
    #[must_use]
    pub fn stats(&self) -> Arc<DispatchStats> {
        self.dispatcher.stats()
    }

    /// Runs the relay on the current task until it stops.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ReceiveFailed`] if the socket failed.
    pub async fn run(self) -> Result<(), TransportError> {
        self.dispatcher.run().await
    }

    /// Runs the relay on a background task.
    #[must_use]
    pub fn spawn(self) -> RelayHandle {
        let registry = self.registry();
        let stats = self.stats();
        let shutdown = self.shutdown_handle();
        let task = tokio::spawn(self.run());
        RelayHandle {
            registry,
            stats,
            shutdown,
            task,
        }
    }
}

/// A relay running on a background task.
pub struct RelayHandle {
    registry: Arc<SessionRegistry>,
    stats: Arc<DispatchStats>,
    shutdown: ShutdownHandle,
    task: JoinHandle<Result<(), TransportError>>,
}

impl RelayHandle {
    /// The running relay's session registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// The running relay's dispatch counters.
    #[must_use]
    pub const fn stats(&self) -> &Arc<DispatchStats> {
        &self.stats
    }

    /// A handle that can stop the relay from elsewhere.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Requests shutdown and waits for queued work to finish.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] if the relay had already stopped on a
    /// transport failure or its task failed.
    pub async fn shutdown(self) -> Result<(), ServerError> {
        self.shutdown.shutdown();
        self.join().await
    }

    /// Waits for the relay to stop on its own.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] if the relay stopped on a transport failure
    /// or its task failed.
    pub async fn join(self) -> Result<(), ServerError> {
        self.task.await??;
        Ok(())
    }
}

/// Binds a UDP relay per `config` and starts it in the background.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns [`ServerError`] if the configuration is invalid or the socket
/// cannot be bound.
pub async fn start_server(config: &RelayConfig) -> Result<(SocketAddr, RelayHandle), ServerError> {
    let (server, local_addr) = RelayServer::bind(config).await?;
    tracing::info!(addr = %local_addr, "relay listening");
    Ok((local_addr, server.spawn()))
}
