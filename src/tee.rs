//! Duplicating reader used by the relay and echo modes.
//!
//! Every byte read through a [`TeeReader`] is handed to an [`Observer`]
//! before the caller sees it.

use crate::config::MirrorSink;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tracing::debug;

/// Longest prefix shown by the log observer
const PREVIEW_LEN: usize = 64;

/// Receives a copy of mirrored traffic.
pub trait Observer: Send + Sync {
    fn observe(&self, peer: SocketAddr, bytes: &[u8]);
}

/// Discards everything.
pub struct NullObserver;

impl Observer for NullObserver {
    fn observe(&self, _peer: SocketAddr, _bytes: &[u8]) {}
}

/// Logs each chunk at debug level with a printable preview.
pub struct LogObserver;

impl Observer for LogObserver {
    fn observe(&self, peer: SocketAddr, bytes: &[u8]) {
        let preview = String::from_utf8_lossy(&bytes[..bytes.len().min(PREVIEW_LEN)]);
        debug!(
            peer = %peer,
            len = bytes.len(),
            preview = %preview.escape_debug(),
            "Mirrored bytes"
        );
    }
}

/// Writes raw bytes to stdout.
///
/// The write is a blocking `std::io::stdout` call made from inside
/// `poll_read`, so a slow stdout stalls the runtime worker driving that
/// session. Meant for interactive debugging, not for heavy traffic.
pub struct StdoutObserver;

impl Observer for StdoutObserver {
    fn observe(&self, _peer: SocketAddr, bytes: &[u8]) {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(bytes).and_then(|()| stdout.flush());
    }
}

/// Build the observer for a configured sink.
pub fn observer_for(sink: MirrorSink) -> Arc<dyn Observer> {
    match sink {
        MirrorSink::Off => Arc::new(NullObserver),
        MirrorSink::Log => Arc::new(LogObserver),
        MirrorSink::Stdout => Arc::new(StdoutObserver),
    }
}

/// An `AsyncRead` that mirrors what it reads.
pub struct TeeReader<R> {
    inner: R,
    observer: Arc<dyn Observer>,
    peer: SocketAddr,
}

impl<R> TeeReader<R> {
    pub fn new(inner: R, observer: Arc<dyn Observer>, peer: SocketAddr) -> Self {
        Self {
            inner,
            observer,
            peer,
        }
    }

}

impl<R: AsyncRead + Unpin> AsyncRead for TeeReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();

        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;

        let fresh = &buf.filled()[before..];
        if !fresh.is_empty() {
            this.observer.observe(this.peer, fresh);
        }

        Poll::Ready(Ok(()))
    }
}
