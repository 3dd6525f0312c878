//! fetch-a-file: a line-protocol TCP file server
//!
//! A client sends `GET <filename>\n`; the server answers `OK <size>\n`
//! followed by the file, or `ERROR: <message>\n`. Files are served from a
//! single flat directory, the serving root.
//!
//! Two companion modes share the listener:
//! - relay: forward a client to a fixed upstream, mirroring client bytes
//! - echo: send client bytes back, mirroring them the same way

pub mod client;
pub mod config;
pub mod echo;
pub mod error;
pub mod handler;
pub mod pipe;
pub mod protocol;
pub mod relay;
pub mod root;
pub mod server;
pub mod tee;
