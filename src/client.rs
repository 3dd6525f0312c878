//! Client side of the file protocol.
//!
//! Sends `GET <filename>\n`, reads the status line, and copies exactly the
//! announced number of bytes into a writer. A body shorter than announced
//! is an error: the server commits to a size before streaming, so a short
//! read means the transfer was cut off.

use crate::protocol::Response;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

/// Longest status line the client will accept
const MAX_STATUS_LINE: u64 = 1024;

/// Fetch errors
#[derive(Debug)]
pub enum FetchError {
    /// Could not reach the server
    Connect(io::Error),
    /// Transport failure mid-exchange
    Io(io::Error),
    /// Server answered `ERROR: <message>`
    Server(String),
    /// Status line was neither `OK <size>` nor `ERROR: ...`
    BadStatus(String),
    /// Fewer body bytes than announced
    Truncated { expected: u64, received: u64 },
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Connect(e) => write!(f, "Failed to connect: {}", e),
            FetchError::Io(e) => write!(f, "I/O error: {}", e),
            FetchError::Server(message) => write!(f, "Server error: {}", message),
            FetchError::BadStatus(line) => write!(f, "Unexpected status line: {:?}", line),
            FetchError::Truncated { expected, received } => {
                write!(f, "Body truncated: expected {} bytes, received {}", expected, received)
            }
        }
    }
}

impl std::error::Error for FetchError {}

impl From<io::Error> for FetchError {
    fn from(e: io::Error) -> Self {
        FetchError::Io(e)
    }
}

/// Connect to `addr` and fetch `filename` into `out`.
///
/// Returns the number of body bytes written.
pub async fn fetch<W>(addr: &str, filename: &str, out: &mut W) -> Result<u64, FetchError>
where
    W: AsyncWrite + Unpin,
{
    let stream = TcpStream::connect(addr).await.map_err(FetchError::Connect)?;
    request(stream, filename, out).await
}

/// Run one request over an established stream.
pub async fn request<S, W>(mut stream: S, filename: &str, out: &mut W) -> Result<u64, FetchError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    W: AsyncWrite + Unpin,
{
    stream
        .write_all(format!("GET {}\n", filename).as_bytes())
        .await?;
    stream.flush().await?;

    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    (&mut reader)
        .take(MAX_STATUS_LINE)
        .read_until(b'\n', &mut line)
        .await?;

    match Response::parse_status(&line) {
        Some(Response::Ok { size }) => {
            debug!(filename, size, "Receiving file");
            let received = tokio::io::copy(&mut (&mut reader).take(size), out).await?;
            out.flush().await?;

            if received < size {
                return Err(FetchError::Truncated {
                    expected: size,
                    received,
                });
            }
            Ok(received)
        }
        Some(Response::Error { message }) => Err(FetchError::Server(message)),
        None => Err(FetchError::BadStatus(
            String::from_utf8_lossy(&line).trim_end().to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_request_ok() {
        let mock = Builder::new()
            .write(b"GET a.txt\n")
            .read(b"OK 5\nhel")
            .read(b"lo")
            .build();

        let mut out = Vec::new();
        let size = request(mock, "a.txt", &mut out).await.unwrap();
        assert_eq!(size, 5);
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn test_request_server_error() {
        let mock = Builder::new()
            .write(b"GET ../x\n")
            .read(b"ERROR: Invalid filename\n")
            .build();

        let mut out = Vec::new();
        match request(mock, "../x", &mut out).await {
            Err(FetchError::Server(message)) => assert_eq!(message, "Invalid filename"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_request_truncated_body() {
        let mock = Builder::new()
            .write(b"GET a.txt\n")
            .read(b"OK 10\nhello")
            .build();

        let mut out = Vec::new();
        match request(mock, "a.txt", &mut out).await {
            Err(FetchError::Truncated { expected, received }) => {
                assert_eq!(expected, 10);
                assert_eq!(received, 5);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_bad_status() {
        let mock = Builder::new()
            .write(b"GET a.txt\n")
            .read(b"HTTP/1.1 200 OK\r\n")
            .build();

        let mut out = Vec::new();
        assert!(matches!(
            request(mock, "a.txt", &mut out).await,
            Err(FetchError::BadStatus(_))
        ));
    }
}
