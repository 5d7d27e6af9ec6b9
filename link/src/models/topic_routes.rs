use serde::{Deserialize, Serialize};

use super::topic::Topic;

/// Maps topics onto broker destinations and REST history resources.
///
/// Templates use `{id}` as the placeholder for the chat id or user id.
///
/// # Example
///
/// ```rust
/// use chat_link::{Topic, TopicRoutes};
///
/// let routes = TopicRoutes::default()
///     .with_chat_destination("/topic/rooms.{id}");
/// assert_eq!(routes.destination(&Topic::chat("9")), "/topic/rooms.9");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRoutes {
    /// Broker destination for a conversation.
    #[serde(default = "default_chat_destination")]
    pub chat_destination: String,

    /// Broker destination for a user's notifications.
    #[serde(default = "default_notification_destination")]
    pub notification_destination: String,

    /// REST resource listing a conversation's messages.
    #[serde(default = "default_chat_history")]
    pub chat_history: String,

    /// REST resource listing a user's notifications.
    #[serde(default = "default_notification_history")]
    pub notification_history: String,

    /// Fixed destination outgoing messages are published to.
    #[serde(default = "default_send_destination")]
    pub send_destination: String,
}

fn default_chat_destination() -> String {
    "/topic/chat/{id}".to_string()
}

fn default_notification_destination() -> String {
    "/user/{id}/queue/notifications".to_string()
}

fn default_chat_history() -> String {
    "/v1/chats/{id}/messages".to_string()
}

fn default_notification_history() -> String {
    "/v1/users/{id}/notifications".to_string()
}

fn default_send_destination() -> String {
    "/app/chat.send".to_string()
}

impl Default for TopicRoutes {
    fn default() -> Self {
        Self {
            chat_destination: default_chat_destination(),
            notification_destination: default_notification_destination(),
            chat_history: default_chat_history(),
            notification_history: default_notification_history(),
            send_destination: default_send_destination(),
        }
    }
}

impl TopicRoutes {
    pub fn with_chat_destination(mut self, template: impl Into<String>) -> Self {
        self.chat_destination = template.into();
        self
    }

    pub fn with_notification_destination(mut self, template: impl Into<String>) -> Self {
        self.notification_destination = template.into();
        self
    }

    pub fn with_chat_history(mut self, template: impl Into<String>) -> Self {
        self.chat_history = template.into();
        self
    }

    pub fn with_notification_history(mut self, template: impl Into<String>) -> Self {
        self.notification_history = template.into();
        self
    }

    pub fn with_send_destination(mut self, destination: impl Into<String>) -> Self {
        self.send_destination = destination.into();
        self
    }

    /// Broker destination to SUBSCRIBE to for `topic`.
    pub fn destination(&self, topic: &Topic) -> String {
        match topic {
            Topic::Chat(id) => fill(&self.chat_destination, id),
            Topic::UserNotifications(id) => fill(&self.notification_destination, id),
        }
    }

    /// REST path (relative to the base URL) serving history for `topic`.
    pub fn history_resource(&self, topic: &Topic) -> String {
        match topic {
            Topic::Chat(id) => fill(&self.chat_history, id),
            Topic::UserNotifications(id) => fill(&self.notification_history, id),
        }
    }
}

fn fill(template: &str, id: &str) -> String {
    template.replace("{id}", id)
}
