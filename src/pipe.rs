//! Deadline-bounded I/O helpers shared by the session handlers.

use crate::error::{SessionError, Stage};
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

/// Copy loop chunk size
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Await `fut`, failing with `Timeout(stage)` once `limit` elapses.
///
/// `None` waits indefinitely.
pub async fn bounded<F, T>(
    limit: Option<Duration>,
    stage: Stage,
    fut: F,
) -> Result<T, SessionError>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result.map_err(SessionError::Io),
            Err(_) => Err(SessionError::Timeout(stage)),
        },
        None => fut.await.map_err(SessionError::Io),
    }
}

/// Copy `reader` into `writer` until EOF, returning the bytes moved.
///
/// Each read waits at most `idle`; each write waits at most `idle` too, so
/// a stalled peer on either side ends the copy.
pub async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    idle: Option<Duration>,
) -> Result<u64, SessionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let n = bounded(idle, Stage::Idle, reader.read(&mut buf)).await?;
        if n == 0 {
            break;
        }

        bounded(idle, Stage::Write, writer.write_all(&buf[..n])).await?;
        bounded(idle, Stage::Write, writer.flush()).await?;
        total += n as u64;
    }

    Ok(total)
}

/// Idle clock shared by both directions of a session.
///
/// Bytes moving either way restart it.
pub struct Activity {
    start: Instant,
    /// Milliseconds from `start` to the last touch.
    last: AtomicU64,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            last: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        let elapsed = self.start.elapsed().as_millis() as u64;
        self.last.store(elapsed, Ordering::Relaxed);
    }

    /// Resolves once `idle` passes without a touch.
    pub async fn expired(&self, idle: Duration) {
        loop {
            let last = Duration::from_millis(self.last.load(Ordering::Relaxed));
            let deadline = self.start + last + idle;
            if Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep_until(deadline).await;
        }
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy `reader` into `writer` until EOF with no per-operation deadline.
///
/// Each chunk touches `activity` and is added to `moved`, so the count
/// survives if the copy is cancelled.
pub async fn pump_tracked<R, W>(
    reader: &mut R,
    writer: &mut W,
    activity: &Activity,
    moved: &mut u64,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        activity.touch();

        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        activity.touch();
        *moved += n as u64;
    }
}
