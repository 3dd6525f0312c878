//! Session error taxonomy.
//!
//! Every session ends in at most one of these. Client-visible variants map
//! to exactly one `ERROR:` message on the wire; transport failures and
//! timeouts never produce a response line.

use std::fmt;
use std::io;

pub const MSG_MALFORMED_REQUEST: &str = "Invalid request format. Use: GET filename";
pub const MSG_NO_FILENAME: &str = "No filename specified";
pub const MSG_INVALID_FILENAME: &str = "Invalid filename";
pub const MSG_ACCESS_DENIED: &str = "Access denied";
pub const MSG_NOT_FOUND: &str = "File not found or cannot be opened";
pub const MSG_STAT_FAILURE: &str = "Cannot access file information";

/// The suspension point a deadline was attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Reading the request line.
    Request,
    /// Writing a status line or a chunk of body.
    Write,
    /// Dialing the relay upstream.
    Connect,
    /// Waiting for the next chunk in a copy loop.
    Idle,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Request => write!(f, "request"),
            Stage::Write => write!(f, "write"),
            Stage::Connect => write!(f, "connect"),
            Stage::Idle => write!(f, "idle"),
        }
    }
}

/// Why a session ended early.
#[derive(Debug)]
pub enum SessionError {
    /// Request line did not start with `GET `.
    MalformedRequest,
    /// `GET ` with nothing after it.
    NoFilename,
    /// Empty name, or one containing `..` or a separator.
    InvalidFilename,
    /// Resolved path would leave the serving root.
    AccessDenied,
    /// Open failed, or the target is not a regular file.
    NotFound(io::Error),
    /// Metadata lookup failed on an opened file.
    StatFailure(io::Error),
    /// Transport failure on the client or upstream socket.
    Io(io::Error),
    /// A deadline expired.
    Timeout(Stage),
    /// The relay could not reach its upstream.
    UpstreamConnect(io::Error),
}

impl SessionError {
    /// Message sent to the client as `ERROR: <message>`, if any.
    pub fn client_message(&self) -> Option<&'static str> {
        match self {
            SessionError::MalformedRequest => Some(MSG_MALFORMED_REQUEST),
            SessionError::NoFilename => Some(MSG_NO_FILENAME),
            SessionError::InvalidFilename => Some(MSG_INVALID_FILENAME),
            SessionError::AccessDenied => Some(MSG_ACCESS_DENIED),
            SessionError::NotFound(_) => Some(MSG_NOT_FOUND),
            SessionError::StatFailure(_) => Some(MSG_STAT_FAILURE),
            SessionError::Io(_) | SessionError::Timeout(_) | SessionError::UpstreamConnect(_) => {
                None
            }
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::MalformedRequest => write!(f, "malformed request"),
            SessionError::NoFilename => write!(f, "no filename specified"),
            SessionError::InvalidFilename => write!(f, "invalid filename"),
            SessionError::AccessDenied => write!(f, "access denied"),
            SessionError::NotFound(e) => write!(f, "file not found: {}", e),
            SessionError::StatFailure(e) => write!(f, "stat failed: {}", e),
            SessionError::Io(e) => write!(f, "I/O error: {}", e),
            SessionError::Timeout(stage) => write!(f, "{} timed out", stage),
            SessionError::UpstreamConnect(e) => write!(f, "upstream connect failed: {}", e),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::NotFound(e)
            | SessionError::StatFailure(e)
            | SessionError::Io(e)
            | SessionError::UpstreamConnect(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SessionError {
    fn from(e: io::Error) -> Self {
        SessionError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages() {
        assert_eq!(
            SessionError::MalformedRequest.client_message(),
            Some("Invalid request format. Use: GET filename")
        );
        assert_eq!(
            SessionError::NotFound(io::ErrorKind::NotFound.into()).client_message(),
            Some("File not found or cannot be opened")
        );
        assert_eq!(SessionError::Timeout(Stage::Request).client_message(), None);
        assert_eq!(
            SessionError::Io(io::ErrorKind::BrokenPipe.into()).client_message(),
            None
        );
    }

    #[test]
    fn test_access_denied_hides_path() {
        let err = SessionError::AccessDenied;
        assert_eq!(err.client_message(), Some("Access denied"));
        assert!(!err.to_string().contains('/'));
    }
}
