//! Echo mode: send every client byte straight back.
//!
//! Input is read through a [`TeeReader`], so the observer sink sees the
//! same traffic. Useful for checking connectivity and the mirror sink
//! without a serving root or an upstream.

use crate::config::Config;
use crate::error::SessionError;
use crate::pipe::pump;
use crate::tee::{observer_for, Observer, TeeReader};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

pub struct Echo {
    idle_timeout: Option<Duration>,
    observer: Arc<dyn Observer>,
}

impl Echo {
    pub fn new(idle_timeout: Option<Duration>, observer: Arc<dyn Observer>) -> Self {
        Self {
            idle_timeout,
            observer,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.idle_timeout, observer_for(config.mirror))
    }

    /// Echo until the client closes. Returns the bytes echoed.
    pub async fn handle<S>(&self, stream: S, peer: SocketAddr) -> Result<u64, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = TeeReader::new(reader, Arc::clone(&self.observer), peer);

        let echoed = pump(&mut reader, &mut writer, self.idle_timeout).await?;
        writer.shutdown().await?;

        debug!(echoed, "Echo session finished");
        Ok(echoed)
    }
}
