use serde::{Deserialize, Serialize};
use std::fmt;

use super::chat_item::ChatItem;

/// Position of a history page.
///
/// Page-numbered backends use [`PageToken::Page`], starting at `0` for the
/// newest page; cursor backends hand back an opaque [`PageToken::Cursor`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageToken {
    Page(u32),
    Cursor(String),
}

impl PageToken {
    /// Token for the newest page.
    pub fn first() -> Self {
        Self::Page(0)
    }
}

impl Default for PageToken {
    fn default() -> Self {
        Self::first()
    }
}

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Page(n) => write!(f, "page={}", n),
            Self::Cursor(c) => write!(f, "cursor={}", c),
        }
    }
}

/// One page of historical items.
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    /// Items of this page, in any order; the reconciler sorts.
    pub items: Vec<ChatItem>,
    /// Token of the next older page, `None` at the end of history.
    pub next: Option<PageToken>,
}

impl HistoryPage {
    pub fn new(items: Vec<ChatItem>, next: Option<PageToken>) -> Self {
        Self { items, next }
    }

    /// A final page.
    pub fn last(items: Vec<ChatItem>) -> Self {
        Self { items, next: None }
    }

    pub fn is_end_of_history(&self) -> bool {
        self.next.is_none()
    }
}
