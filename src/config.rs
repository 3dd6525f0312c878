//! Configuration module for the fetch-a-file server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::DEFAULT_MAX_REQUEST_LINE;
use crate::relay::DEFAULT_INITIAL_CHUNK;

/// How accepted connections are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Serve files from the root over the GET line protocol
    Serve,
    /// Forward clients to a fixed upstream
    Relay,
    /// Echo client bytes back
    Echo,
}

/// Where relay and echo traffic is mirrored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorSink {
    Off,
    Log,
    Stdout,
}

/// Command-line arguments for the file server
#[derive(Parser, Debug)]
#[command(name = "fetch-a-file")]
#[command(author = "fetch-a-file authors")]
#[command(version = "0.1.0")]
#[command(about = "A line-protocol TCP file server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:8002)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Directory files are served from
    #[arg(short = 'r', long)]
    pub root: Option<PathBuf>,

    /// Connection handling mode
    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    /// Upstream address for relay mode (e.g., 127.0.0.1:8004)
    #[arg(short = 'u', long)]
    pub upstream: Option<String>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Connection handling mode
    #[serde(default = "default_mode")]
    pub mode: Mode,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Maximum concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            mode: default_mode(),
            workers: None,
            max_connections: default_max_connections(),
        }
    }
}

/// File-serving configuration
#[derive(Debug, Deserialize)]
pub struct FilesConfig {
    /// Serving root directory
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Longest accepted request line
    #[serde(default = "default_max_request_line")]
    pub max_request_line: usize,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            max_request_line: default_max_request_line(),
        }
    }
}

/// Per-connection deadlines in seconds (0 = wait forever)
#[derive(Debug, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
    #[serde(default = "default_write_timeout")]
    pub write: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
            write: default_write_timeout(),
            connect: default_connect_timeout(),
            idle: default_idle_timeout(),
        }
    }
}

/// Relay and echo configuration
#[derive(Debug, Deserialize)]
pub struct RelayConfig {
    /// Upstream address
    pub upstream: Option<String>,
    /// Size of the first client read
    #[serde(default = "default_initial_chunk")]
    pub initial_chunk: usize,
    /// Forward only the first chunk
    #[serde(default)]
    pub single_shot: bool,
    /// Mirror sink for client bytes
    #[serde(default = "default_mirror")]
    pub mirror: MirrorSink,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            upstream: None,
            initial_chunk: default_initial_chunk(),
            single_shot: false,
            mirror: default_mirror(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8002".to_string()
}

fn default_mode() -> Mode {
    Mode::Serve
}

fn default_max_connections() -> usize {
    10000
}

fn default_root() -> PathBuf {
    PathBuf::from("files")
}

fn default_max_request_line() -> usize {
    DEFAULT_MAX_REQUEST_LINE
}

fn default_request_timeout() -> u64 {
    30
}

fn default_write_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_initial_chunk() -> usize {
    DEFAULT_INITIAL_CHUNK
}

fn default_mirror() -> MirrorSink {
    MirrorSink::Log
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Seconds to an optional deadline; zero disables it.
fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub mode: Mode,
    pub root: PathBuf,
    pub max_request_line: usize,
    pub workers: Option<usize>,
    pub max_connections: usize,
    pub request_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub upstream: Option<String>,
    pub initial_chunk: usize,
    pub single_shot: bool,
    pub mirror: MirrorSink,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolve already-parsed CLI arguments, reading the TOML file they name.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen_str = cli.listen.unwrap_or(toml_config.server.listen);
        let listen = listen_str
            .parse()
            .map_err(|e| ConfigError::InvalidListen(listen_str.clone(), e))?;

        let config = Config {
            listen,
            mode: cli.mode.unwrap_or(toml_config.server.mode),
            root: cli.root.unwrap_or(toml_config.files.root),
            max_request_line: toml_config.files.max_request_line,
            workers: cli.workers.or(toml_config.server.workers),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            request_timeout: seconds(toml_config.timeouts.request),
            write_timeout: seconds(toml_config.timeouts.write),
            connect_timeout: seconds(toml_config.timeouts.connect),
            idle_timeout: seconds(toml_config.timeouts.idle),
            upstream: cli.upstream.or(toml_config.relay.upstream),
            initial_chunk: toml_config.relay.initial_chunk,
            single_shot: toml_config.relay.single_shot,
            mirror: toml_config.relay.mirror,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mode == Mode::Relay && self.upstream.is_none() {
            return Err(ConfigError::MissingUpstream);
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Zero("workers"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Zero("max_connections"));
        }
        if self.max_request_line == 0 {
            return Err(ConfigError::Zero("max_request_line"));
        }
        if self.initial_chunk == 0 {
            return Err(ConfigError::Zero("initial_chunk"));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidListen(String, std::net::AddrParseError),
    MissingUpstream,
    Zero(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidListen(addr, e) => {
                write!(f, "Invalid listen address '{}': {}", addr, e)
            }
            ConfigError::MissingUpstream => write!(f, "Relay mode requires an upstream address"),
            ConfigError::Zero(field) => write!(f, "'{}' must be greater than zero", field),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        let mut argv = vec!["fetch-a-file"];
        argv.extend_from_slice(args);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "127.0.0.1:8002");
        assert_eq!(config.server.mode, Mode::Serve);
        assert_eq!(config.files.root, PathBuf::from("files"));
        assert_eq!(config.files.max_request_line, 4096);
        assert_eq!(config.timeouts.request, 30);
        assert_eq!(config.relay.initial_chunk, 1024);
        assert_eq!(config.relay.mirror, MirrorSink::Log);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:9000"
            mode = "relay"
            workers = 4

            [files]
            root = "/srv/files"
            max_request_line = 1024

            [timeouts]
            request = 0
            idle = 5

            [relay]
            upstream = "10.0.0.1:8004"
            single_shot = true
            mirror = "stdout"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert_eq!(config.server.mode, Mode::Relay);
        assert_eq!(config.server.workers, Some(4));
        assert_eq!(config.files.root, PathBuf::from("/srv/files"));
        assert_eq!(config.files.max_request_line, 1024);
        assert_eq!(config.timeouts.request, 0);
        assert_eq!(config.timeouts.write, 60);
        assert_eq!(config.relay.upstream.as_deref(), Some("10.0.0.1:8004"));
        assert!(config.relay.single_shot);
        assert_eq!(config.relay.mirror, MirrorSink::Stdout);
        assert_eq!(config.logging.level, "debug");

        let resolved = Config::merge(cli(&[]), config).unwrap();
        assert_eq!(resolved.request_timeout, None);
        assert_eq!(resolved.idle_timeout, Some(Duration::from_secs(5)));
        assert_eq!(resolved.log_level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let config = Config::merge(
            cli(&[
                "--listen",
                "127.0.0.1:0",
                "--root",
                "/tmp/x",
                "--mode",
                "echo",
                "--log-level",
                "warn",
            ]),
            TomlConfig::default(),
        )
        .unwrap();

        assert_eq!(config.listen, "127.0.0.1:0".parse::<SocketAddr>().unwrap());
        assert_eq!(config.root, PathBuf::from("/tmp/x"));
        assert_eq!(config.mode, Mode::Echo);
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_relay_requires_upstream() {
        let err = Config::merge(cli(&["--mode", "relay"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingUpstream));

        let config = Config::merge(
            cli(&["--mode", "relay", "--upstream", "127.0.0.1:8004"]),
            TomlConfig::default(),
        )
        .unwrap();
        assert_eq!(config.upstream.as_deref(), Some("127.0.0.1:8004"));
    }

    #[test]
    fn test_invalid_values() {
        let err = Config::merge(cli(&["--listen", "not an address"]), TomlConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidListen(..)));

        let err = Config::merge(cli(&["--workers", "0"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Zero("workers")));
    }
}
