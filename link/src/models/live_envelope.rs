use serde::{Deserialize, Serialize};

use super::chat_item::{ChatItem, ItemId};
use crate::error::{ChatLinkError, Result};

/// Payload pushed on a topic subscription.
///
/// # JSON Wire Format
///
/// ```json
/// {"command": "new",    "item": {"id": "1", "content": "hi", "createdAt": 100}}
/// {"command": "edit",   "item": {"id": "1", "content": "hi!", "createdAt": 100, "editedAt": 130}}
/// {"command": "delete", "id": "1"}
/// ```
///
/// A bare item object without a `command` field is read as `new`; some
/// broker deployments push items unwrapped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum LiveEnvelope {
    /// A newly created item.
    New { item: ChatItem },
    /// A replacement for an item that already exists.
    Edit { item: ChatItem },
    /// Removal of an item by id.
    Delete { id: ItemId },
}

impl LiveEnvelope {
    /// The identifier this envelope is about.
    pub fn item_id(&self) -> &ItemId {
        match self {
            Self::New { item } | Self::Edit { item } => &item.id,
            Self::Delete { id } => id,
        }
    }

    /// Decode a MESSAGE body.
    ///
    /// Returns [`ChatLinkError::MalformedPayloadError`] for anything that is
    /// neither a known envelope nor a plain item.
    pub fn decode(body: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(body).map_err(|e| {
            ChatLinkError::MalformedPayloadError(format!("Body is not JSON: {}", e))
        })?;

        if value.get("command").is_some() {
            return serde_json::from_value(value).map_err(|e| {
                ChatLinkError::MalformedPayloadError(format!("Invalid envelope: {}", e))
            });
        }

        serde_json::from_value::<ChatItem>(value)
            .map(|item| Self::New { item })
            .map_err(|e| ChatLinkError::MalformedPayloadError(format!("Invalid item: {}", e)))
    }
}
