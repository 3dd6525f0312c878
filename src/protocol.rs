//! File protocol parser and response generator.
//!
//! Requests are a single line:
//!
//! ```text
//! GET <filename>\n
//! ```
//!
//! Responses start with a status line, either `OK <size>\n` followed by
//! exactly `size` raw bytes, or `ERROR: <message>\n` and nothing else.

use crate::error::SessionError;
use bytes::BytesMut;
use std::str;

/// Default cap on a request line without a newline.
pub const DEFAULT_MAX_REQUEST_LINE: usize = 4096;

/// Parsed request command. Only retrieval exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Get,
}

/// A parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub filename: String,
}

/// Protocol parsing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Not valid UTF-8 or no `GET ` prefix
    Malformed,
    /// `GET ` followed by nothing
    NoFilename,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Malformed => write!(f, "Malformed request line"),
            ParseError::NoFilename => write!(f, "No filename in request"),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<ParseError> for SessionError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::Malformed => SessionError::MalformedRequest,
            ParseError::NoFilename => SessionError::NoFilename,
        }
    }
}

/// Result of parsing a request
#[derive(Debug)]
pub enum ParseResult {
    /// Parsed request with bytes consumed (including the newline)
    Complete(Request, usize),
    /// No newline yet
    Incomplete,
    /// Parse error
    Error(ParseError),
}

/// Parser for the request line
pub struct Parser;

impl Parser {
    /// Parse a request from the buffer.
    ///
    /// Leading whitespace and the line terminator (`\n` or `\r\n`) are
    /// dropped. The keyword is case-sensitive and must be followed by a
    /// single space; the filename is the rest of the line, trimmed.
    pub fn parse(buffer: &[u8]) -> ParseResult {
        let line_end = match find_lf(buffer) {
            Some(pos) => pos,
            None => return ParseResult::Incomplete,
        };

        let line = match str::from_utf8(&buffer[..line_end]) {
            Ok(s) => s,
            Err(_) => return ParseResult::Error(ParseError::Malformed),
        };

        let line = line.strip_suffix('\r').unwrap_or(line).trim_start();

        let filename = match line.strip_prefix("GET ") {
            Some(rest) => rest.trim(),
            None => return ParseResult::Error(ParseError::Malformed),
        };

        if filename.is_empty() {
            return ParseResult::Error(ParseError::NoFilename);
        }

        ParseResult::Complete(
            Request {
                command: Command::Get,
                filename: filename.to_string(),
            },
            line_end + 1,
        )
    }
}

/// A response status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `OK <size>`; the body follows.
    Ok { size: u64 },
    /// `ERROR: <message>`
    Error { message: String },
}

impl Response {
    pub fn ok(size: u64) -> Self {
        Response::Ok { size }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }

    /// Encode the status line, newline included.
    pub fn encode(&self) -> BytesMut {
        let line = match self {
            Response::Ok { size } => format!("OK {}\n", size),
            Response::Error { message } => format!("ERROR: {}\n", message),
        };
        BytesMut::from(line.as_bytes())
    }

    /// Parse a status line as received by a client.
    ///
    /// Accepts the line with or without its terminator.
    pub fn parse_status(line: &[u8]) -> Option<Self> {
        let line = str::from_utf8(line).ok()?;
        let line = line.trim_end_matches(&['\r', '\n'][..]);

        if let Some(size) = line.strip_prefix("OK ") {
            return size.parse().ok().map(Response::ok);
        }

        line.strip_prefix("ERROR: ").map(Response::error)
    }
}

/// Find `\n` in buffer
fn find_lf(buffer: &[u8]) -> Option<usize> {
    buffer.iter().position(|&b| b == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get() {
        match Parser::parse(b"GET a.txt\n") {
            ParseResult::Complete(request, consumed) => {
                assert_eq!(request.command, Command::Get);
                assert_eq!(request.filename, "a.txt");
                assert_eq!(consumed, 10);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_crlf_and_whitespace() {
        match Parser::parse(b"  GET   report.pdf  \r\n") {
            ParseResult::Complete(request, _) => assert_eq!(request.filename, "report.pdf"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_consumes_only_first_line() {
        match Parser::parse(b"GET a.txt\nGET b.txt\n") {
            ParseResult::Complete(request, consumed) => {
                assert_eq!(request.filename, "a.txt");
                assert_eq!(consumed, 10);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_incomplete() {
        match Parser::parse(b"GET a.t") {
            ParseResult::Incomplete => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_wrong_verb() {
        let lines: [&[u8]; 5] = [b"PUT a.txt\n", b"get a.txt\n", b"GETa.txt\n", b"GET\n", b"\n"];
        for line in lines {
            match Parser::parse(line) {
                ParseResult::Error(ParseError::Malformed) => {}
                other => panic!("unexpected for {:?}: {:?}", line, other),
            }
        }
    }

    #[test]
    fn test_no_filename() {
        match Parser::parse(b"GET \n") {
            ParseResult::Error(ParseError::NoFilename) => {}
            other => panic!("unexpected: {:?}", other),
        }

        match Parser::parse(b"GET    \r\n") {
            ParseResult::Error(ParseError::NoFilename) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_utf8() {
        match Parser::parse(b"GET \xff\xfe\n") {
            ParseResult::Error(ParseError::Malformed) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_maps_to_session_error() {
        assert!(matches!(
            SessionError::from(ParseError::Malformed),
            SessionError::MalformedRequest
        ));
        assert!(matches!(
            SessionError::from(ParseError::NoFilename),
            SessionError::NoFilename
        ));
    }

    #[test]
    fn test_response_encode() {
        assert_eq!(&Response::ok(5).encode()[..], b"OK 5\n");
        assert_eq!(&Response::ok(0).encode()[..], b"OK 0\n");
        assert_eq!(
            &Response::error("Access denied").encode()[..],
            b"ERROR: Access denied\n"
        );
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(Response::parse_status(b"OK 1048576\n"), Some(Response::ok(1048576)));
        assert_eq!(
            Response::parse_status(b"ERROR: Invalid filename\n"),
            Some(Response::error("Invalid filename"))
        );
        assert_eq!(Response::parse_status(b"OK -1\n"), None);
        assert_eq!(Response::parse_status(b"HELLO\n"), None);
    }
}
