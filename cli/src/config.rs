//! Configuration file management
//!
//! CLIConfiguration with TOML parsing for ~/.chat-link/config.toml
//!
//! # Configuration Format
//!
//! ```toml
//! [server]
//! url = "http://localhost:8080"  # Backend base URL (REST and WebSocket)
//! ws_path = "/v1/ws"             # STOMP endpoint path
//!
//! [connection]
//! auto_reconnect = true          # Auto-reconnect on connection loss
//! reconnect_delay_ms = 1000      # Initial reconnect delay
//! max_reconnect_delay_ms = 30000 # Maximum reconnect delay
//! max_reconnect_attempts = 0     # Max reconnect attempts (0 = unlimited)
//!
//! [auth]
//! jwt_token = "your-jwt-token"
//!
//! [stream]
//! page_size = 50
//! ```

use chat_link::{ConnectionOptions, StreamOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CLIError, Result};

const DEFAULT_CONFIG_PATH: &str = "~/.chat-link/config.toml";

/// CLI configuration loaded from TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CLIConfiguration {
    /// Server connection settings
    pub server: Option<ServerConfig>,

    /// Connection/reconnection settings
    pub connection: Option<ConnectionConfig>,

    /// Authentication settings
    pub auth: Option<AuthConfig>,

    /// History paging settings
    pub stream: Option<StreamConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Backend base URL (e.g., http://localhost:8080)
    pub url: Option<String>,

    /// WebSocket endpoint path appended to the base URL
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
}

/// Connection settings for reconnection behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Enable automatic reconnection on connection loss (default: true)
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// Initial delay between reconnection attempts in milliseconds (default: 1000)
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Maximum delay between reconnection attempts in milliseconds (default: 30000)
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,

    /// Maximum number of reconnection attempts (0 = unlimited, default: 0)
    #[serde(default)]
    pub max_reconnect_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// JWT authentication token
    pub jwt_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Items requested per history page
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_ws_path() -> String {
    ConnectionOptions::default().ws_path
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_delay_ms() -> u64 {
    30000
}

fn default_page_size() -> u32 {
    StreamOptions::default().page_size
}

pub fn expand_config_path(path: &Path) -> PathBuf {
    let path_str = path.to_str().unwrap_or(DEFAULT_CONFIG_PATH);
    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(rest);
        }
    }
    path.to_path_buf()
}

pub fn default_config_path() -> PathBuf {
    expand_config_path(Path::new(DEFAULT_CONFIG_PATH))
}

impl CLIConfiguration {
    /// Load configuration from file
    ///
    /// Returns default configuration if file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        let expanded_path = expand_config_path(path);
        let path = &expanded_path;

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            CLIError::ConfigurationError(format!("Failed to read config file: {}", e))
        })?;

        let config: CLIConfiguration = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn server_url(&self) -> Option<&str> {
        self.server.as_ref().and_then(|s| s.url.as_deref())
    }

    pub fn jwt_token(&self) -> Option<&str> {
        self.auth.as_ref().and_then(|a| a.jwt_token.as_deref())
    }

    /// Build ConnectionOptions from the `[server]` and `[connection]` tables
    pub fn to_connection_options(&self) -> ConnectionOptions {
        let mut options = ConnectionOptions::default();

        if let Some(ref server) = self.server {
            options = options.with_ws_path(server.ws_path.clone());
        }

        if let Some(ref conn) = self.connection {
            options = options
                .with_auto_reconnect(conn.auto_reconnect)
                .with_reconnect_delay_ms(conn.reconnect_delay_ms)
                .with_max_reconnect_delay_ms(conn.max_reconnect_delay_ms);

            // Convert 0 to None (unlimited), otherwise Some(n)
            let max_attempts = if conn.max_reconnect_attempts == 0 {
                None
            } else {
                Some(conn.max_reconnect_attempts)
            };
            options = options.with_max_reconnect_attempts(max_attempts);
        }

        options
    }

    pub fn to_stream_options(&self) -> StreamOptions {
        let mut options = StreamOptions::default();
        if let Some(ref stream) = self.stream {
            options = options.with_page_size(stream.page_size);
        }
        options
    }
}
