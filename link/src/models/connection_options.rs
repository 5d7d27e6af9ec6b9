use serde::{Deserialize, Serialize};

/// Connection-level options for the broker connection.
///
/// These options control:
/// - Which WebSocket endpoint the STOMP session runs over
/// - Automatic reconnection on connection loss
/// - Reconnection timing and retry limits
/// - STOMP heart-beat negotiation
///
/// Separate from [`StreamOptions`](super::StreamOptions) which control
/// individual topic streams.
///
/// # Example
///
/// ```rust
/// use chat_link::ConnectionOptions;
///
/// let options = ConnectionOptions::default()
///     .with_auto_reconnect(true)
///     .with_reconnect_delay_ms(2000)
///     .with_max_reconnect_attempts(Some(10));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Path of the WebSocket endpoint on the base URL.
    /// Default: `/v1/ws`
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Value of the STOMP `host` header. Defaults to the host of the base URL.
    #[serde(default)]
    pub virtual_host: Option<String>,

    /// Enable automatic reconnection on connection loss
    /// Default: true
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// Initial delay in milliseconds between reconnection attempts
    /// Default: 1000ms, doubled per attempt up to max_reconnect_delay_ms
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Maximum delay between reconnection attempts
    /// Default: 30000ms
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,

    /// Maximum number of reconnection attempts before giving up
    /// Default: None (retry until `disconnect()`)
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,

    /// Interval at which the client offers to send heart-beats, in ms.
    /// `0` disables outgoing heart-beats. Default: 10000
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_outgoing_ms: u64,

    /// Interval at which the client asks the broker for heart-beats, in ms.
    /// `0` disables dead-connection detection. Default: 10000
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_incoming_ms: u64,
}

fn default_ws_path() -> String {
    "/v1/ws".to_string()
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

fn default_heartbeat_ms() -> u64 {
    10000
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            ws_path: default_ws_path(),
            virtual_host: None,
            auto_reconnect: true,
            reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 30000,
            max_reconnect_attempts: None,
            heartbeat_outgoing_ms: 10000,
            heartbeat_incoming_ms: 10000,
        }
    }
}

impl ConnectionOptions {
    /// Create new connection options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the WebSocket endpoint path
    pub fn with_ws_path(mut self, path: impl Into<String>) -> Self {
        self.ws_path = path.into();
        self
    }

    /// Set the STOMP virtual host
    pub fn with_virtual_host(mut self, host: impl Into<String>) -> Self {
        self.virtual_host = Some(host.into());
        self
    }

    /// Set whether to automatically reconnect on connection loss
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the initial delay between reconnection attempts (in milliseconds)
    pub fn with_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }

    /// Set the maximum delay between reconnection attempts (in milliseconds)
    pub fn with_max_reconnect_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_reconnect_delay_ms = max_delay_ms;
        self
    }

    /// Set the maximum number of reconnection attempts
    /// Pass None to retry until `disconnect()`
    pub fn with_max_reconnect_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self
    }

    /// Set both heart-beat intervals (in milliseconds, `0` disables)
    pub fn with_heartbeat_ms(mut self, outgoing: u64, incoming: u64) -> Self {
        self.heartbeat_outgoing_ms = outgoing;
        self.heartbeat_incoming_ms = incoming;
        self
    }

    /// Backoff before reconnection attempt number `attempt` (zero-based).
    pub fn reconnect_delay(&self, attempt: u32) -> std::time::Duration {
        let delay = std::cmp::min(
            self.reconnect_delay_ms
                .saturating_mul(2u64.saturating_pow(attempt)),
            self.max_reconnect_delay_ms,
        );
        std::time::Duration::from_millis(delay)
    }
}
