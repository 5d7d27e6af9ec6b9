use serde::{Deserialize, Serialize};

use super::topic::Topic;

/// Body of a STOMP SEND carrying a user-authored item.
///
/// ```json
/// {"topic": "chat:42", "content": "hello"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingItem {
    pub topic: Topic,
    pub content: String,
}

impl OutgoingItem {
    pub fn new(topic: Topic, content: impl Into<String>) -> Self {
        Self {
            topic,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_item_wire_shape() {
        let body = serde_json::to_string(&OutgoingItem::new(Topic::chat("42"), "hello")).unwrap();
        assert_eq!(body, r#"{"topic":"chat:42","content":"hello"}"#);
    }
}
