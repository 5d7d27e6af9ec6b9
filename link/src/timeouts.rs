//! Timeout configuration for chat-link operations.

use std::time::Duration;

/// Timeouts for connection establishment, history requests and sends.
///
/// # Examples
///
/// ```rust
/// use chat_link::ChatLinkTimeouts;
/// use std::time::Duration;
///
/// let timeouts = ChatLinkTimeouts::default();
///
/// let timeouts = ChatLinkTimeouts::builder()
///     .connection_timeout(Duration::from_secs(30))
///     .history_timeout_secs(60)
///     .build();
///
/// let timeouts = ChatLinkTimeouts::fast();
/// ```
#[derive(Debug, Clone)]
pub struct ChatLinkTimeouts {
    /// WebSocket handshake (TCP + TLS + upgrade).
    /// Default: 10 seconds
    pub connection_timeout: Duration,

    /// Wait for the broker's `CONNECTED` frame after `CONNECT`.
    /// Default: 5 seconds
    pub connect_ack_timeout: Duration,

    /// One history page request, end to end.
    /// Default: 30 seconds
    pub history_timeout: Duration,

    /// Writing one frame to the socket.
    /// Default: 10 seconds
    pub send_timeout: Duration,

    /// Wait for the `RECEIPT` of `DISCONNECT` before closing the socket.
    /// Default: 2 seconds
    pub disconnect_timeout: Duration,
}

impl Default for ChatLinkTimeouts {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            connect_ack_timeout: Duration::from_secs(5),
            history_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(10),
            disconnect_timeout: Duration::from_secs(2),
        }
    }
}

impl ChatLinkTimeouts {
    pub fn builder() -> ChatLinkTimeoutsBuilder {
        ChatLinkTimeoutsBuilder::new()
    }

    /// Short timeouts for a broker on localhost.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            connect_ack_timeout: Duration::from_secs(2),
            history_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(2),
            disconnect_timeout: Duration::from_millis(500),
        }
    }

    /// Long timeouts for high-latency or unreliable networks.
    pub fn relaxed() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            connect_ack_timeout: Duration::from_secs(15),
            history_timeout: Duration::from_secs(120),
            send_timeout: Duration::from_secs(30),
            disconnect_timeout: Duration::from_secs(5),
        }
    }

    /// Check if a duration represents "no timeout" (zero or very large).
    pub fn is_no_timeout(duration: Duration) -> bool {
        duration.is_zero() || duration > Duration::from_secs(86400 * 365)
    }
}

/// Run `fut` under `limit`, unless `limit` means "no timeout".
pub(crate) async fn with_limit<F, T>(limit: Duration, fut: F) -> Option<T>
where
    F: std::future::Future<Output = T>,
{
    if ChatLinkTimeouts::is_no_timeout(limit) {
        Some(fut.await)
    } else {
        tokio::time::timeout(limit, fut).await.ok()
    }
}

/// Builder for [`ChatLinkTimeouts`].
#[derive(Debug, Clone)]
pub struct ChatLinkTimeoutsBuilder {
    timeouts: ChatLinkTimeouts,
}

impl ChatLinkTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: ChatLinkTimeouts::default(),
        }
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connection_timeout = timeout;
        self
    }

    pub fn connection_timeout_secs(self, secs: u64) -> Self {
        self.connection_timeout(Duration::from_secs(secs))
    }

    pub fn connect_ack_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connect_ack_timeout = timeout;
        self
    }

    pub fn connect_ack_timeout_secs(self, secs: u64) -> Self {
        self.connect_ack_timeout(Duration::from_secs(secs))
    }

    pub fn history_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.history_timeout = timeout;
        self
    }

    pub fn history_timeout_secs(self, secs: u64) -> Self {
        self.history_timeout(Duration::from_secs(secs))
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.send_timeout = timeout;
        self
    }

    pub fn send_timeout_secs(self, secs: u64) -> Self {
        self.send_timeout(Duration::from_secs(secs))
    }

    pub fn disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.disconnect_timeout = timeout;
        self
    }

    pub fn build(self) -> ChatLinkTimeouts {
        self.timeouts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let timeouts = ChatLinkTimeouts::default();
        assert_eq!(timeouts.connection_timeout, Duration::from_secs(10));
        assert_eq!(timeouts.connect_ack_timeout, Duration::from_secs(5));
        assert_eq!(timeouts.history_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_builder() {
        let timeouts = ChatLinkTimeouts::builder()
            .connection_timeout_secs(60)
            .history_timeout(Duration::from_millis(1500))
            .send_timeout_secs(3)
            .build();
        assert_eq!(timeouts.connection_timeout, Duration::from_secs(60));
        assert_eq!(timeouts.history_timeout, Duration::from_millis(1500));
        assert_eq!(timeouts.send_timeout, Duration::from_secs(3));
        assert_eq!(timeouts.disconnect_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_presets_ordering() {
        assert!(ChatLinkTimeouts::fast().history_timeout < ChatLinkTimeouts::relaxed().history_timeout);
    }

    #[test]
    fn test_is_no_timeout() {
        assert!(ChatLinkTimeouts::is_no_timeout(Duration::ZERO));
        assert!(ChatLinkTimeouts::is_no_timeout(Duration::from_secs(86400 * 366)));
        assert!(!ChatLinkTimeouts::is_no_timeout(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_with_limit() {
        assert_eq!(with_limit(Duration::ZERO, async { 7 }).await, Some(7));
        let slow = with_limit(Duration::from_millis(10), tokio::time::sleep(Duration::from_secs(5)));
        assert!(slow.await.is_none());
    }
}
