//! TCP listener loop.
//!
//! Accepts connections and spawns one task per connection. The loop only
//! spawns; it never waits for a session to finish. An accept failure ends
//! the loop and is returned to the caller.

use crate::config::{Config, Mode};
use crate::echo::Echo;
use crate::handler::{self, Outcome, SessionLimits};
use crate::relay::Relay;
use crate::root::ServingRoot;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Pending connection backlog
const LISTEN_BACKLOG: i32 = 1024;

/// Server setup and accept-loop errors
#[derive(Debug)]
pub enum ServerError {
    /// Serving root missing or not a directory
    Root(PathBuf, io::Error),
    /// Relay mode without an upstream
    MissingUpstream,
    /// Failed to bind the listener
    Bind(SocketAddr, io::Error),
    /// Failed to accept a connection
    Accept(io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Root(path, e) => {
                write!(f, "Invalid serving root '{}': {}", path.display(), e)
            }
            ServerError::MissingUpstream => write!(f, "Relay mode requires an upstream address"),
            ServerError::Bind(addr, e) => write!(f, "Failed to bind {}: {}", addr, e),
            ServerError::Accept(e) => write!(f, "Failed to accept connection: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

/// What each accepted connection is handed to.
#[derive(Clone)]
pub enum Service {
    Files {
        root: Arc<ServingRoot>,
        limits: Arc<SessionLimits>,
    },
    Relay(Arc<Relay>),
    Echo(Arc<Echo>),
}

impl Service {
    pub fn files(root: ServingRoot, limits: SessionLimits) -> Self {
        Service::Files {
            root: Arc::new(root),
            limits: Arc::new(limits),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ServerError> {
        match config.mode {
            Mode::Serve => {
                let root = ServingRoot::new(&config.root)
                    .map_err(|e| ServerError::Root(config.root.clone(), e))?;
                info!(root = %root.path().display(), "Serving files");
                Ok(Service::files(root, SessionLimits::from_config(config)))
            }
            Mode::Relay => {
                let relay = Relay::from_config(config).ok_or(ServerError::MissingUpstream)?;
                info!(upstream = %relay.upstream(), "Relaying connections");
                Ok(Service::Relay(Arc::new(relay)))
            }
            Mode::Echo => Ok(Service::Echo(Arc::new(Echo::from_config(config)))),
        }
    }

    /// Run one session to completion.
    async fn serve(&self, stream: TcpStream, peer: SocketAddr) {
        match self {
            Service::Files { root, limits } => {
                match handler::handle_connection(stream, root, limits).await {
                    Outcome::Served { filename, size } => {
                        debug!(filename = %filename, size, "Transfer complete");
                    }
                    Outcome::Truncated { .. } => {}
                    Outcome::Rejected(e) => debug!(error = %e, "Request rejected"),
                    Outcome::Dropped(e) => debug!(error = %e, "Connection dropped"),
                }
            }
            Service::Relay(relay) => {
                if let Err(e) = relay.handle(stream, peer).await {
                    warn!(error = %e, "Relay session failed");
                }
            }
            Service::Echo(echo) => {
                if let Err(e) = echo.handle(stream, peer).await {
                    debug!(error = %e, "Echo session failed");
                }
            }
        }
    }
}

/// Server instance
pub struct Server {
    listener: TcpListener,
    service: Service,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Build the service from `config` and bind its listen address.
    pub async fn bind(config: &Config) -> Result<Self, ServerError> {
        let service = Service::from_config(config)?;
        let listener =
            create_listener(config.listen).map_err(|e| ServerError::Bind(config.listen, e))?;
        Ok(Self::new(listener, service, config.max_connections))
    }

    /// Wrap an already-bound listener.
    pub fn new(listener: TcpListener, service: Service, max_connections: usize) -> Self {
        Server {
            listener,
            service,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until an accept fails.
    pub async fn run(self) -> Result<(), ServerError> {
        if let Ok(addr) = self.listener.local_addr() {
            info!(address = %addr, "Server listening");
        }

        loop {
            // Wait for a connection slot; the semaphore is never closed.
            let permit = match self.connection_limit.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return Ok(()),
            };

            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    return Err(ServerError::Accept(e));
                }
            };
            debug!(peer = %peer, "New connection");

            let service = self.service.clone();
            tokio::spawn(
                async move {
                    service.serve(stream, peer).await;
                    drop(permit);
                }
                .instrument(info_span!("session", peer = %peer)),
            );
        }
    }
}

/// Create a TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    TcpListener::from_std(socket.into())
}
