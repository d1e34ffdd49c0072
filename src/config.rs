//! Configuration for the wirestep server and client.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::protocols::http::{Limits, Method};
use crate::server::ServerOptions;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "wirestep")]
#[command(version)]
#[command(about = "One-shot HTTP-style request/response over TCP", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,

    /// Address to bind to (e.g., 0.0.0.0:8080)
    #[arg(short = 'l', long, global = true)]
    pub listen: Option<String>,

    /// Connection scheduling strategy
    #[arg(short = 's', long, value_enum, global = true)]
    pub scheduler: Option<SchedulerKind>,

    /// Worker threads for the pool scheduler (defaults to number of CPU cores)
    #[arg(short = 'w', long, global = true)]
    pub workers: Option<usize>,

    /// Live connections tracked by the event loop
    #[arg(long, global = true)]
    pub max_connections: Option<usize>,

    /// Readiness events fetched per poll
    #[arg(long, global = true)]
    pub event_capacity: Option<usize>,

    /// Line buffer size in bytes
    #[arg(long, global = true)]
    pub buffer_capacity: Option<usize>,

    /// Initial allocation for bodies without a Content-Length
    #[arg(long, global = true)]
    pub body_capacity: Option<usize>,

    /// Largest accepted message body in bytes
    #[arg(long, global = true)]
    pub max_body_size: Option<usize>,

    /// Reply with this many bytes instead of "OK"
    #[arg(long, global = true)]
    pub reply_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the server (default)
    Serve,
    /// Send one request and print the response body
    Send {
        /// Server address as host:port
        addr: String,
        /// Request body
        message: String,
        #[arg(long, default_value = "POST")]
        method: Method,
        #[arg(long, default_value = "/message")]
        target: String,
    },
}

/// How accepted connections are served.
#[derive(ValueEnum, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerKind {
    /// One connection at a time on the accepting thread
    Sequential,
    /// A new thread per connection
    Thread,
    /// A fixed pool of worker threads
    Pool,
    /// A single-threaded readiness loop
    EventLoop,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub reply: ReplyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_scheduler")]
    pub scheduler: SchedulerKind,
    pub workers: Option<usize>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            scheduler: default_scheduler(),
            workers: None,
            max_connections: default_max_connections(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Message framing limits
#[derive(Debug, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default = "default_body_capacity")]
    pub body_capacity: usize,
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            body_capacity: default_body_capacity(),
            max_body_size: default_max_body_size(),
        }
    }
}

/// Fixed reply payload
#[derive(Debug, Deserialize, Default)]
pub struct ReplyConfig {
    /// Absent means the literal "OK"
    pub size: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
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
    "0.0.0.0:8080".to_string()
}

fn default_scheduler() -> SchedulerKind {
    SchedulerKind::Pool
}

fn default_max_connections() -> usize {
    1024
}

fn default_event_capacity() -> usize {
    256
}

fn default_buffer_capacity() -> usize {
    crate::runtime::DEFAULT_CAPACITY
}

fn default_body_capacity() -> usize {
    1024
}

fn default_max_body_size() -> usize {
    16 * 1024 * 1024 // 16 MiB
}

fn default_log_level() -> String {
    "info".to_string()
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub command: Command,
    pub listen: String,
    pub scheduler: SchedulerKind,
    pub workers: usize,
    pub max_connections: usize,
    pub event_capacity: usize,
    pub buffer_capacity: usize,
    pub body_capacity: usize,
    pub max_body_size: usize,
    pub reply_size: Option<usize>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Merge parsed CLI args over the TOML file named by `--config`, if any.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    fn merge(cli: CliArgs, file: TomlConfig) -> Self {
        Config {
            command: cli.command.unwrap_or(Command::Serve),
            listen: cli.listen.unwrap_or(file.server.listen),
            scheduler: cli.scheduler.unwrap_or(file.server.scheduler),
            workers: cli
                .workers
                .or(file.server.workers)
                .unwrap_or_else(num_cpus),
            max_connections: cli.max_connections.unwrap_or(file.server.max_connections),
            event_capacity: cli.event_capacity.unwrap_or(file.server.event_capacity),
            buffer_capacity: cli.buffer_capacity.unwrap_or(file.protocol.buffer_capacity),
            body_capacity: cli.body_capacity.unwrap_or(file.protocol.body_capacity),
            max_body_size: cli.max_body_size.unwrap_or(file.protocol.max_body_size),
            reply_size: cli.reply_size.or(file.reply.size),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                file.logging.level
            },
        }
    }

    pub fn limits(&self) -> Limits {
        Limits {
            buffer_capacity: self.buffer_capacity,
            body_capacity: self.body_capacity,
            max_body: self.max_body_size,
        }
    }

    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            scheduler: self.scheduler,
            workers: self.workers,
            max_connections: self.max_connections,
            event_capacity: self.event_capacity,
            limits: self.limits(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
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
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("wirestep").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.server.scheduler, SchedulerKind::Pool);
        assert_eq!(config.server.max_connections, 1024);
        assert_eq!(config.protocol.buffer_capacity, 4096);
        assert_eq!(config.protocol.max_body_size, 16 * 1024 * 1024);
        assert_eq!(config.reply.size, None);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "127.0.0.1:9000"
            scheduler = "event-loop"
            workers = 4

            [protocol]
            max_body_size = 1024

            [reply]
            size = 64

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(config.server.scheduler, SchedulerKind::EventLoop);
        assert_eq!(config.server.workers, Some(4));
        assert_eq!(config.server.event_capacity, 256);
        assert_eq!(config.protocol.max_body_size, 1024);
        assert_eq!(config.protocol.body_capacity, 1024);
        assert_eq!(config.reply.size, Some(64));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_unknown_scheduler_rejected() {
        let result: Result<TomlConfig, _> = toml::from_str("[server]\nscheduler = \"fibers\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: TomlConfig = toml::from_str(
            "[server]\nlisten = \"127.0.0.1:9000\"\nworkers = 2\n[logging]\nlevel = \"warn\"\n",
        )
        .unwrap();
        let cli = parse(&["--listen", "127.0.0.1:7000", "--scheduler", "thread"]);

        let config = Config::merge(cli, file);
        assert_eq!(config.command, Command::Serve);
        assert_eq!(config.listen, "127.0.0.1:7000");
        assert_eq!(config.scheduler, SchedulerKind::Thread);
        assert_eq!(config.workers, 2);
        assert_eq!(config.log_level, "warn");

        let options = config.server_options();
        assert_eq!(options.workers, 2);
        assert_eq!(options.limits.max_body, 16 * 1024 * 1024);
    }

    #[test]
    fn test_send_subcommand() {
        let cli = parse(&["send", "127.0.0.1:8080", "hello", "--method", "GET"]);
        let config = Config::merge(cli, TomlConfig::default());
        assert_eq!(
            config.command,
            Command::Send {
                addr: "127.0.0.1:8080".to_string(),
                message: "hello".to_string(),
                method: Method::Get,
                target: "/message".to_string(),
            }
        );
        assert!(config.workers >= 1);
    }
}
