//! Subscription metadata exposed to callers.
//!
//! [`SubscriptionInfo`] provides a read-only snapshot of a registry entry,
//! useful for debugging, tests and status displays.

use serde::{Deserialize, Serialize};

use super::topic::Topic;

/// Read-only snapshot of one topic in the subscription registry.
///
/// Returned by [`ConnectionManager::list_subscriptions()`](crate::ConnectionManager::list_subscriptions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub topic: Topic,
    /// STOMP subscription id used on the wire.
    pub wire_id: String,
    /// Broker destination.
    pub destination: String,
    /// Number of local handlers sharing the wire subscription.
    pub handlers: usize,
    /// Whether the wire subscription exists on the current session.
    pub live: bool,
    /// Millis since Unix epoch when the topic was first subscribed.
    pub created_at_ms: u64,
    /// Millis since Unix epoch of the last routed item, if any.
    pub last_event_time_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_info_serializes_topic_text() {
        let info = SubscriptionInfo {
            topic: Topic::chat("1"),
            wire_id: "sub-1".to_string(),
            destination: "/topic/chat/1".to_string(),
            handlers: 2,
            live: true,
            created_at_ms: 1700000000000,
            last_event_time_ms: None,
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"topic\":\"chat:1\""));
        let back: SubscriptionInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back.handlers, 2);
        assert!(back.last_event_time_ms.is_none());
    }
}
