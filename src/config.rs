//! Configuration module for echo-verify.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::step::{default_messages, echo_sequence, Step};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "echo-verify")]
#[command(author = "echo-verify authors")]
#[command(version = "0.1.0")]
#[command(about = "Verify WebSocket echo round trips", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the echo sequence against a server
    Verify {
        /// WebSocket URL (e.g., ws://localhost:8880/websocket/tests/send)
        #[arg(short, long)]
        url: Option<String>,

        /// Deadline for the whole exchange in milliseconds
        #[arg(short, long)]
        deadline_ms: Option<u64>,

        /// Message to send and expect back; repeat for more steps
        #[arg(short, long = "message")]
        messages: Vec<String>,

        /// Print a layout-test transcript to stdout
        #[arg(long)]
        transcript: bool,
    },

    /// Run an echo server for the verifier to talk to
    Serve {
        /// Address to bind to (e.g., 127.0.0.1:8880)
        #[arg(short = 'l', long)]
        listen: Option<String>,

        /// Close each connection after this many echoes (0 = never)
        #[arg(long)]
        close_after: Option<usize>,

        /// Maximum number of concurrent connections
        #[arg(long)]
        max_connections: Option<usize>,
    },
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Client-related configuration
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    /// WebSocket URL to verify
    #[serde(default = "default_url")]
    pub url: String,
    /// Deadline for the whole exchange in milliseconds
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    /// Messages to echo, in order
    #[serde(default = "default_messages")]
    pub messages: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            deadline_ms: default_deadline_ms(),
            messages: default_messages(),
        }
    }
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Echoes before the server closes a connection (0 = never)
    #[serde(default = "default_close_after")]
    pub close_after: usize,
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            close_after: default_close_after(),
            max_connections: default_max_connections(),
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

fn default_url() -> String {
    "ws://localhost:8880/websocket/tests/send".to_string()
}

fn default_deadline_ms() -> u64 {
    3000
}

fn default_listen() -> String {
    "127.0.0.1:8880".to_string()
}

fn default_close_after() -> usize {
    2 // matches the default two-step sequence
}

fn default_max_connections() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolved settings for a verification run
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    pub url: String,
    pub deadline: Duration,
    pub steps: Vec<Step>,
    pub transcript: bool,
}

/// Resolved settings for the echo server
#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub listen: String,
    /// `None` keeps connections open until the client closes.
    pub close_after: Option<usize>,
    pub max_connections: usize,
}

#[derive(Debug, Clone)]
pub enum Mode {
    Verify(VerifyConfig),
    Serve(ServeConfig),
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
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
        let mode = match cli.command {
            Command::Verify {
                url,
                deadline_ms,
                messages,
                transcript,
            } => {
                let deadline_ms = deadline_ms.unwrap_or(toml_config.client.deadline_ms);
                if deadline_ms == 0 {
                    return Err(ConfigError::Invalid("deadline_ms must be greater than zero"));
                }

                let messages = if messages.is_empty() {
                    toml_config.client.messages
                } else {
                    messages
                };
                if messages.is_empty() {
                    return Err(ConfigError::Invalid("at least one message is required"));
                }

                Mode::Verify(VerifyConfig {
                    url: url.unwrap_or(toml_config.client.url),
                    deadline: Duration::from_millis(deadline_ms),
                    steps: echo_sequence(messages),
                    transcript,
                })
            }
            Command::Serve {
                listen,
                close_after,
                max_connections,
            } => {
                let max_connections =
                    max_connections.unwrap_or(toml_config.server.max_connections);
                if max_connections == 0 {
                    return Err(ConfigError::Invalid(
                        "max_connections must be greater than zero",
                    ));
                }

                let close_after = close_after.unwrap_or(toml_config.server.close_after);

                Mode::Serve(ServeConfig {
                    listen: listen.unwrap_or(toml_config.server.listen),
                    close_after: (close_after > 0).then_some(close_after),
                    max_connections,
                })
            }
        };

        Ok(Config {
            mode,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {1}", path = .0.display())]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{path}': {1}", path = .0.display())]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
