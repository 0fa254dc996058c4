use std::time::Duration;

use clap::Parser;
use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Sidekick relay server command line.
#[derive(Parser, Debug)]
#[command(
    name = "sidekick-server",
    version,
    about = "WebSocket relay pairing UI clients with worker agents"
)]
pub struct Cli {
    /// Path to TOML config file
    #[arg(long, env = "SIDEKICK_CONFIG", default_value = "./sidekick.toml")]
    pub config: String,

    /// Override the listen address from the config file
    #[arg(long, env = "SIDEKICK_ADDRESS")]
    pub address: Option<String>,

    /// Override the log level from the config file
    #[arg(long, env = "SIDEKICK_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "SIDEKICK_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,
}

/// Top-level server configuration, loaded from TOML.
///
/// Unknown keys are rejected so a typo in the config file fails the process
/// at startup instead of silently falling back to a default.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "PascalCase", deny_unknown_fields, default)]
pub struct Config {
    /// Log level: trace, debug, info, warn, error. Anything else disables logging.
    pub log_level: String,
    /// Listen address, host:port
    pub address: String,
    /// Directory served to plain GET requests
    pub web_root: String,
    /// Mount prefix for all routes
    #[serde(rename = "BaseURL")]
    pub base_url: String,
    /// Token issuance settings
    pub auth: AuthConf,
    /// WebSocket tuning for UI clients
    pub client_web_socket: WebSocketConf,
    /// WebSocket tuning for workers
    pub bot_web_socket: WebSocketConf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            address: "127.0.0.1:55550".to_string(),
            web_root: "./web".to_string(),
            base_url: "/".to_string(),
            auth: AuthConf::default(),
            client_web_socket: WebSocketConf::default(),
            bot_web_socket: WebSocketConf::default(),
        }
    }
}

/// Single-use bearer token settings.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "PascalCase", deny_unknown_fields, default)]
pub struct AuthConf {
    /// Audience claim stamped into and required from every token
    pub audience: String,
    /// Token lifetime in seconds
    #[serde(rename = "TokenTtl")]
    pub token_ttl_secs: u64,
    /// Path to the 32-byte HMAC signing key; generated on first boot
    pub key_file: String,
}

impl Default for AuthConf {
    fn default() -> Self {
        Self {
            audience: "sidekick".to_string(),
            token_ttl_secs: 10,
            key_file: "./sidekick.key".to_string(),
        }
    }
}

impl AuthConf {
    /// Token lifetime as a Duration.
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

/// Per-endpoint WebSocket tuning. Durations are integer seconds in TOML.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "PascalCase", deny_unknown_fields, default)]
pub struct WebSocketConf {
    /// Transport read buffer, bytes
    pub read_buffer_size: usize,
    /// Transport write buffer, bytes
    pub write_buffer_size: usize,
    /// Largest inbound message accepted, bytes
    pub max_message_size: usize,
    /// Outbound queue capacity, messages; overflow drops the slow endpoint
    pub message_queue_size: usize,
    /// Seconds between server pings
    #[serde(rename = "PingInterval")]
    pub ping_interval_secs: u64,
    /// Seconds of inbound silence tolerated before the connection is dropped
    #[serde(rename = "PongTimeout")]
    pub pong_timeout_secs: u64,
    /// Seconds allowed for a single socket write
    #[serde(rename = "WriteTimeout")]
    pub write_timeout_secs: u64,
}

impl Default for WebSocketConf {
    fn default() -> Self {
        Self {
            read_buffer_size: 1024,
            write_buffer_size: 1024,
            max_message_size: 1 << 20,
            message_queue_size: 256,
            ping_interval_secs: 54,
            pong_timeout_secs: 60,
            write_timeout_secs: 10,
        }
    }
}

impl WebSocketConf {
    /// Interval between server pings as a Duration.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Read deadline extension granted by each inbound frame.
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }

    /// Per-write deadline as a Duration.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < CLI/env overrides.
    pub fn load(cli: &Cli) -> Result<Self, figment::Error> {
        let mut conf: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .extract()?;

        if let Some(address) = &cli.address {
            conf.address = address.clone();
        }
        if let Some(log_level) = &cli.log_level {
            conf.log_level = log_level.clone();
        }

        Ok(conf)
    }

    /// Tracing filter directive for the configured log level.
    /// Unrecognized levels disable crate logging entirely.
    pub fn log_directive(&self) -> String {
        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {
                format!("sidekick_server={}", self.log_level)
            }
            _ => "sidekick_server=off".to_string(),
        }
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Sidekick relay server configuration
# Place this file at ./sidekick.toml or specify with --config <path>

# Log level: trace, debug, info, warn, error (default: info)
# LogLevel = "info"

# Listen address (default: 127.0.0.1:55550)
# Address = "127.0.0.1:55550"

# Directory served to plain GET requests (default: ./web)
# WebRoot = "./web"

# Mount prefix for all routes (default: /)
# BaseURL = "/"

# [Auth]
# Audience stamped into issued tokens (default: sidekick)
# Audience = "sidekick"
# Token lifetime in seconds (default: 10)
# TokenTtl = 10
# Path to the HMAC signing key; generated on first boot (default: ./sidekick.key)
# KeyFile = "./sidekick.key"

# [ClientWebSocket] and [BotWebSocket] accept the same keys.
# Durations are integer seconds.
#
# [ClientWebSocket]
# ReadBufferSize = 1024
# WriteBufferSize = 1024
# MaxMessageSize = 1048576
# MessageQueueSize = 256
# PingInterval = 54
# PongTimeout = 60
# WriteTimeout = 10
#
# [BotWebSocket]
# MessageQueueSize = 256
"#
    .to_string()
}
