//! File-serving session for a single connection.
//!
//! A session moves through `AwaitingRequest -> Validating -> Streaming ->
//! Closed`. Failures while awaiting or validating divert to `Error`, which
//! writes one `ERROR:` line (best effort) and closes. A failed read of the
//! request line closes without any response. The socket and any opened file
//! are dropped when the session returns, on every path.

use crate::config::Config;
use crate::error::{SessionError, Stage};
use crate::pipe::{bounded, CHUNK_SIZE};
use crate::protocol::{ParseResult, Parser, Request, Response, DEFAULT_MAX_REQUEST_LINE};
use crate::root::{OpenedFile, ServingRoot};
use bytes::BytesMut;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace, warn};

/// Initial request buffer size
const REQUEST_BUFFER_SIZE: usize = 512;

/// Per-session limits.
#[derive(Debug, Clone)]
pub struct SessionLimits {
    /// Deadline for the whole request line.
    pub request_timeout: Option<Duration>,
    /// Deadline for each individual write.
    pub write_timeout: Option<Duration>,
    /// Longest accepted request line without a newline.
    pub max_request_line: usize,
}

impl SessionLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            request_timeout: config.request_timeout,
            write_timeout: config.write_timeout,
            max_request_line: config.max_request_line,
        }
    }
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
            write_timeout: Some(Duration::from_secs(60)),
            max_request_line: DEFAULT_MAX_REQUEST_LINE,
        }
    }
}

/// Session state, reported in trace logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingRequest,
    Validating,
    Streaming,
    Error,
    Closed,
}

/// How a session ended.
#[derive(Debug)]
pub enum Outcome {
    /// Status line and the full body were sent.
    Served { filename: String, size: u64 },
    /// Body cut short after `OK <size>` went out.
    Truncated {
        filename: String,
        size: u64,
        sent: u64,
        error: SessionError,
    },
    /// An `ERROR:` line was sent, or attempted.
    Rejected(SessionError),
    /// Closed with no response line.
    Dropped(SessionError),
}

struct Session<'a, S> {
    stream: S,
    root: &'a ServingRoot,
    limits: &'a SessionLimits,
    state: SessionState,
}

/// Serve one request on `stream`.
pub async fn handle_connection<S>(stream: S, root: &ServingRoot, limits: &SessionLimits) -> Outcome
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = Session {
        stream,
        root,
        limits,
        state: SessionState::AwaitingRequest,
    };

    let outcome = session.run().await;
    session.close().await;
    outcome
}

impl<S> Session<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn run(&mut self) -> Outcome {
        let request_timeout = self.limits.request_timeout;
        let read = self.read_request();
        let request = match bounded(request_timeout, Stage::Request, read).await {
            Ok(Ok(request)) => request,
            Ok(Err(e)) => return self.reject(e).await,
            Err(e) => {
                debug!(error = %e, "Failed to read request");
                return Outcome::Dropped(e);
            }
        };

        self.transition(SessionState::Validating);
        let opened = match self.validate(&request).await {
            Ok(opened) => opened,
            Err(e) => return self.reject(e).await,
        };

        self.transition(SessionState::Streaming);
        info!(filename = %request.filename, size = opened.size, "Serving file");

        let size = opened.size;
        let mut sent = 0u64;
        match self.stream_file(opened, &mut sent).await {
            Ok(()) => Outcome::Served {
                filename: request.filename,
                size,
            },
            Err(error) => {
                warn!(
                    filename = %request.filename,
                    size,
                    sent,
                    error = %error,
                    "Transfer cut short"
                );
                Outcome::Truncated {
                    filename: request.filename,
                    size,
                    sent,
                    error,
                }
            }
        }
    }

    /// Read until one full line parses.
    ///
    /// The outer `io::Result` is a transport failure; the inner one is a
    /// protocol rejection that still gets a response line.
    async fn read_request(&mut self) -> io::Result<Result<Request, SessionError>> {
        let mut buffer = BytesMut::with_capacity(REQUEST_BUFFER_SIZE);

        loop {
            match Parser::parse(&buffer) {
                ParseResult::Complete(_, consumed) if consumed > self.limits.max_request_line => {
                    debug!(len = consumed, "Request line too long");
                    return Ok(Err(SessionError::MalformedRequest));
                }
                ParseResult::Complete(request, _) => {
                    trace!(filename = %request.filename, "Parsed request");
                    return Ok(Ok(request));
                }
                ParseResult::Error(e) => {
                    debug!(error = %e, "Rejecting request line");
                    return Ok(Err(e.into()));
                }
                ParseResult::Incomplete => {}
            }

            if buffer.len() >= self.limits.max_request_line {
                debug!(len = buffer.len(), "Request line too long");
                return Ok(Err(SessionError::MalformedRequest));
            }

            let n = self.stream.read_buf(&mut buffer).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before request line",
                ));
            }
        }
    }

    async fn validate(&self, request: &Request) -> Result<OpenedFile, SessionError> {
        let resolved = self.root.resolve(&request.filename)?;
        self.root.open(&resolved).await
    }

    /// Write `OK <size>` and then exactly `size` bytes from the file.
    async fn stream_file(
        &mut self,
        opened: OpenedFile,
        sent: &mut u64,
    ) -> Result<(), SessionError> {
        let write_timeout = self.limits.write_timeout;
        let status = Response::ok(opened.size).encode();
        bounded(write_timeout, Stage::Write, self.stream.write_all(&status)).await?;

        // Never send more than announced, even if the file grew.
        let mut body = opened.file.take(opened.size);
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            let n = body.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            bounded(write_timeout, Stage::Write, self.stream.write_all(&buf[..n])).await?;
            *sent += n as u64;
        }

        bounded(write_timeout, Stage::Write, self.stream.flush()).await?;

        if *sent < opened.size {
            return Err(SessionError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file shrank during transfer",
            )));
        }

        Ok(())
    }

    /// Send the error line for `error` and finish.
    async fn reject(&mut self, error: SessionError) -> Outcome {
        self.transition(SessionState::Error);

        match &error {
            SessionError::AccessDenied => warn!("Access denied"),
            other => debug!(error = %other, "Rejecting request"),
        }

        if let Some(message) = error.client_message() {
            let line = Response::error(message).encode();
            let write = self.stream.write_all(&line);
            if let Err(e) = bounded(self.limits.write_timeout, Stage::Write, write).await {
                debug!(error = %e, "Failed to send error response");
            }
        }

        Outcome::Rejected(error)
    }

    async fn close(&mut self) {
        self.transition(SessionState::Closed);
        let _ = bounded(self.limits.write_timeout, Stage::Write, self.stream.shutdown()).await;
    }

    fn transition(&mut self, next: SessionState) {
        trace!(from = ?self.state, to = ?next, "Session state");
        self.state = next;
    }
}
