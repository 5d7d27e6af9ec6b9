//! Messages and notifications as they appear in a topic stream.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-assigned identifier of an item.
///
/// Backends disagree on whether ids are numbers or strings, so both are
/// accepted and normalised to their decimal/text form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for ItemId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for ItemId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Signed(i64),
            Unsigned(u64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => ItemId(s),
            RawId::Signed(n) => ItemId(n.to_string()),
            RawId::Unsigned(n) => ItemId(n.to_string()),
        })
    }
}

/// Canonical order of items inside a stream: creation time, ties broken by id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrderingKey {
    pub created_at: i64,
    pub id: ItemId,
}

/// A chat message or a notification.
///
/// Equality is by identifier only: two payloads with the same id describe the
/// same item even if one of them is an edited version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatItem {
    pub id: ItemId,

    /// Textual topic (`chat:42`) when the backend echoes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    /// Author of a message or origin of a notification.
    #[serde(default, alias = "authorId", skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,

    #[serde(default)]
    pub content: String,

    /// Milliseconds since the Unix epoch.
    #[serde(alias = "timestamp", alias = "ts")]
    pub created_at: i64,

    /// Set when the item was edited after creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<i64>,
}

impl ChatItem {
    pub fn new(id: impl Into<ItemId>, created_at: i64, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            topic: None,
            sender_id: None,
            content: content.into(),
            created_at,
            edited_at: None,
        }
    }

    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }

    pub fn ordering_key(&self) -> OrderingKey {
        OrderingKey {
            created_at: self.created_at,
            id: self.id.clone(),
        }
    }

    /// Compare against a key without cloning the id.
    pub(crate) fn cmp_key(&self, created_at: i64, id: &ItemId) -> std::cmp::Ordering {
        self.created_at
            .cmp(&created_at)
            .then_with(|| self.id.cmp(id))
    }
}

impl PartialEq for ChatItem {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ChatItem {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_and_string_ids() {
        let a: ChatItem = serde_json::from_str(r#"{"id":7,"content":"hi","createdAt":100}"#).unwrap();
        let b: ChatItem = serde_json::from_str(r#"{"id":"7","content":"hi!","ts":100}"#).unwrap();
        assert_eq!(a.id, ItemId::new("7"));
        assert_eq!(a, b, "equality is by identifier");
    }

    #[test]
    fn test_ordering_key_ties_break_on_id() {
        let a = ChatItem::new("a", 100, "x");
        let b = ChatItem::new("b", 100, "y");
        let c = ChatItem::new("0", 50, "z");
        assert!(a.ordering_key() < b.ordering_key());
        assert!(c.ordering_key() < a.ordering_key());
        assert_eq!(a.cmp_key(100, &ItemId::new("b")), std::cmp::Ordering::Less);
    }

    #[test]
    fn test_sender_aliases() {
        let item: ChatItem =
            serde_json::from_str(r#"{"id":"1","authorId":"bob","content":"","timestamp":5}"#)
                .unwrap();
        assert_eq!(item.sender_id.as_deref(), Some("bob"));
        assert_eq!(item.created_at, 5);
    }
}
