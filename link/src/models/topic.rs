//! Logical channels a client can follow.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ChatLinkError;

/// A conversation or a user's notification stream.
///
/// The textual form (`chat:{chatId}`, `user:{userId}:notifications`) is what
/// appears in outgoing `{ topic, content }` bodies and in logs. Broker
/// destinations and REST resources are derived through
/// [`TopicRoutes`](super::TopicRoutes).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    /// Messages of one conversation.
    Chat(String),
    /// Notifications addressed to one user.
    UserNotifications(String),
}

impl Topic {
    pub fn chat(chat_id: impl Into<String>) -> Self {
        Self::Chat(chat_id.into())
    }

    pub fn notifications(user_id: impl Into<String>) -> Self {
        Self::UserNotifications(user_id.into())
    }

    /// The chat id or user id this topic is keyed by.
    pub fn id(&self) -> &str {
        match self {
            Self::Chat(id) | Self::UserNotifications(id) => id,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat(id) => write!(f, "chat:{}", id),
            Self::UserNotifications(id) => write!(f, "user:{}:notifications", id),
        }
    }
}

impl FromStr for Topic {
    type Err = ChatLinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            ChatLinkError::ConfigurationError(format!(
                "Invalid topic '{}'; expected chat:<id> or user:<id>:notifications",
                s
            ))
        };

        if let Some(id) = s.strip_prefix("chat:") {
            if id.is_empty() || id.contains(':') {
                return Err(invalid());
            }
            return Ok(Self::Chat(id.to_string()));
        }

        if let Some(id) = s
            .strip_prefix("user:")
            .and_then(|rest| rest.strip_suffix(":notifications"))
        {
            if id.is_empty() || id.contains(':') {
                return Err(invalid());
            }
            return Ok(Self::UserNotifications(id.to_string()));
        }

        Err(invalid())
    }
}

impl Serialize for Topic {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let chat = Topic::chat("42");
        assert_eq!(chat.to_string(), "chat:42");
        assert_eq!("chat:42".parse::<Topic>().unwrap(), chat);

        let notes = Topic::notifications("alice");
        assert_eq!(notes.to_string(), "user:alice:notifications");
        assert_eq!("user:alice:notifications".parse::<Topic>().unwrap(), notes);
        assert_eq!(notes.id(), "alice");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("chat:".parse::<Topic>().is_err());
        assert!("user:bob".parse::<Topic>().is_err());
        assert!("user::notifications".parse::<Topic>().is_err());
        assert!("room:1".parse::<Topic>().is_err());
    }

    #[test]
    fn test_serde_uses_text_form() {
        let json = serde_json::to_string(&Topic::chat("7")).unwrap();
        assert_eq!(json, "\"chat:7\"");
        let back: Topic = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Topic::chat("7"));
    }
}
