use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-topic-stream options: history paging and retry.
///
/// # Example
///
/// ```rust
/// use chat_link::StreamOptions;
///
/// let options = StreamOptions::default()
///     .with_page_size(100)
///     .with_history_max_attempts(5);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamOptions {
    /// Items requested per history page.
    /// Default: 50
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Attempts per history page before the failure is final.
    /// Only transient failures are retried. Default: 3
    #[serde(default = "default_history_max_attempts")]
    pub history_max_attempts: u32,

    /// Backoff before the first history retry, doubled per attempt.
    /// Default: 250ms
    #[serde(default = "default_history_retry_delay_ms")]
    pub history_retry_delay_ms: u64,

    /// Upper bound of the history retry backoff.
    /// Default: 4000ms
    #[serde(default = "default_history_max_retry_delay_ms")]
    pub history_max_retry_delay_ms: u64,

    /// Capacity of the live event channel between the connection task and
    /// the stream. Default: 1024
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_page_size() -> u32 {
    50
}

fn default_history_max_attempts() -> u32 {
    3
}

fn default_history_retry_delay_ms() -> u64 {
    250
}

fn default_history_max_retry_delay_ms() -> u64 {
    4000
}

fn default_event_channel_capacity() -> usize {
    1024
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            history_max_attempts: default_history_max_attempts(),
            history_retry_delay_ms: default_history_retry_delay_ms(),
            history_max_retry_delay_ms: default_history_max_retry_delay_ms(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl StreamOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = size.max(1);
        self
    }

    pub fn with_history_max_attempts(mut self, attempts: u32) -> Self {
        self.history_max_attempts = attempts.max(1);
        self
    }

    pub fn with_history_retry_delay_ms(mut self, delay_ms: u64) -> Self {
        self.history_retry_delay_ms = delay_ms;
        self
    }

    pub fn with_history_max_retry_delay_ms(mut self, delay_ms: u64) -> Self {
        self.history_max_retry_delay_ms = delay_ms;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Backoff before history retry number `retry` (1-based).
    pub fn history_retry_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1);
        let delay = std::cmp::min(
            self.history_retry_delay_ms
                .saturating_mul(2u64.saturating_pow(exp)),
            self.history_max_retry_delay_ms,
        );
        Duration::from_millis(delay)
    }
}
