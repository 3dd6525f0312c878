//! Relay mode: forward a client to a fixed upstream.
//!
//! The relay reads one bounded chunk from the client, dials the upstream,
//! forwards the chunk, and copies the upstream's reply back. Client bytes
//! are read through a [`TeeReader`] so the observer sees everything the
//! client sent.
//!
//! After the first chunk the relay keeps forwarding client bytes. With
//! `single_shot` set, later client bytes are read and dropped. Either side
//! closing ends the session, as does the idle timeout, which is shared by
//! both directions.

use crate::config::Config;
use crate::error::{SessionError, Stage};
use crate::pipe::{bounded, pump_tracked, Activity};
use crate::tee::{observer_for, Observer, TeeReader};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Default size of the initial client read
pub const DEFAULT_INITIAL_CHUNK: usize = 1024;

/// Bytes moved in each direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Client to upstream, first chunk included.
    pub forwarded: u64,
    /// Upstream to client.
    pub returned: u64,
}

/// Relay settings and the shared observer.
pub struct Relay {
    upstream: String,
    initial_chunk: usize,
    single_shot: bool,
    connect_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
    observer: Arc<dyn Observer>,
}

impl Relay {
    pub fn new(upstream: impl Into<String>, observer: Arc<dyn Observer>) -> Self {
        Self {
            upstream: upstream.into(),
            initial_chunk: DEFAULT_INITIAL_CHUNK,
            single_shot: false,
            connect_timeout: Some(Duration::from_secs(10)),
            idle_timeout: Some(Duration::from_secs(300)),
            observer,
        }
    }

    /// Build from resolved configuration. Returns `None` without an upstream.
    pub fn from_config(config: &Config) -> Option<Self> {
        let upstream = config.upstream.clone()?;
        Some(Self {
            upstream,
            initial_chunk: config.initial_chunk,
            single_shot: config.single_shot,
            connect_timeout: config.connect_timeout,
            idle_timeout: config.idle_timeout,
            observer: observer_for(config.mirror),
        })
    }

    pub fn with_single_shot(mut self, single_shot: bool) -> Self {
        self.single_shot = single_shot;
        self
    }

    pub fn with_initial_chunk(mut self, initial_chunk: usize) -> Self {
        self.initial_chunk = initial_chunk;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    /// Relay one client session.
    pub async fn handle<S>(&self, client: S, peer: SocketAddr) -> Result<RelayStats, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (client_read, mut client_write) = tokio::io::split(client);
        let mut client_read = TeeReader::new(client_read, Arc::clone(&self.observer), peer);

        let mut first = vec![0u8; self.initial_chunk];
        let n = bounded(self.idle_timeout, Stage::Idle, client_read.read(&mut first)).await?;
        if n == 0 {
            debug!("Client closed before sending anything");
            return Ok(RelayStats::default());
        }

        let connect = TcpStream::connect(&self.upstream);
        let upstream = match bounded(self.connect_timeout, Stage::Connect, connect).await {
            Ok(stream) => stream,
            Err(SessionError::Io(e)) => return Err(SessionError::UpstreamConnect(e)),
            Err(e) => return Err(e),
        };
        debug!(upstream = %self.upstream, "Connected to upstream");

        let (mut upstream_read, mut upstream_write) = upstream.into_split();
        let first_write = upstream_write.write_all(&first[..n]);
        bounded(self.idle_timeout, Stage::Write, first_write).await?;

        let activity = Activity::new();
        let mut forwarded = n as u64;
        let mut returned = 0u64;

        let ended = {
            let to_client =
                pump_tracked(&mut upstream_read, &mut client_write, &activity, &mut returned);
            let from_client = async {
                if self.single_shot {
                    // Keep reading so a client hang-up is still noticed.
                    tokio::io::copy(&mut client_read, &mut tokio::io::sink()).await?;
                    Ok::<(), SessionError>(())
                } else {
                    pump_tracked(
                        &mut client_read,
                        &mut upstream_write,
                        &activity,
                        &mut forwarded,
                    )
                    .await
                }
            };
            let idle = async {
                match self.idle_timeout {
                    Some(limit) => activity.expired(limit).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                result = to_client => result.map(|()| "upstream"),
                result = from_client => result.map(|()| "client"),
                _ = idle => Err(SessionError::Timeout(Stage::Idle)),
            }
        };

        let _ = client_write.shutdown().await;
        let stats = RelayStats {
            forwarded,
            returned,
        };

        let closed_by = ended?;
        info!(
            upstream = %self.upstream,
            closed_by,
            forwarded = stats.forwarded,
            returned = stats.returned,
            "Relay session finished"
        );
        Ok(stats)
    }
}
