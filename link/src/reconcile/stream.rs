//! Merge state for one topic.
//!
//! [`ReconciledStream`] is synchronous and owns no I/O: the driver feeds it
//! history pages and live envelopes and publishes its snapshots.

use std::collections::HashSet;

use crate::error::ChatLinkError;
use crate::history::HistoryFetchError;
use crate::models::{ChatItem, HistoryPage, ItemId, LiveEnvelope, PageToken, Topic};

/// Lifecycle of a topic stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// Waiting for the first history page; live items are buffered.
    Loading,
    /// History merged; live items are merged as they arrive.
    Ready,
    /// The connection dropped. Items stay visible.
    Reconnecting,
    /// Detached. Nothing changes any more.
    Closed,
}

/// What a consumer sees of a topic stream.
#[derive(Debug, Clone)]
pub struct StreamSnapshot {
    pub topic: Topic,
    pub phase: StreamPhase,
    /// Deduplicated, ordered by `(created_at, id)`, oldest first.
    pub items: Vec<ChatItem>,
    /// Older history can still be loaded.
    pub has_more: bool,
    /// The topic is subscribed on a live session.
    pub is_live: bool,
    /// A history request (or its retry backoff) is in progress.
    pub loading_history: bool,
    /// Most recent failure, cleared by the next successful page.
    pub last_error: Option<ChatLinkError>,
    /// Failed history attempts since the last successful page.
    pub failed_attempts: u32,
}

pub(crate) struct ReconciledStream {
    topic: Topic,
    phase: StreamPhase,
    items: Vec<ChatItem>,
    ids: HashSet<ItemId>,
    /// Deleted ids; an older page must not bring them back.
    tombstones: HashSet<ItemId>,
    /// Live envelopes received before the first page, in arrival order.
    pending: Vec<LiveEnvelope>,
    initial_loaded: bool,
    next_page: Option<PageToken>,
    is_live: bool,
    interrupted: bool,
    loading_history: bool,
    last_error: Option<ChatLinkError>,
    failed_attempts: u32,
}

impl ReconciledStream {
    pub fn new(topic: Topic) -> Self {
        Self {
            topic,
            phase: StreamPhase::Loading,
            items: Vec::new(),
            ids: HashSet::new(),
            tombstones: HashSet::new(),
            pending: Vec::new(),
            initial_loaded: false,
            next_page: Some(PageToken::first()),
            is_live: false,
            interrupted: false,
            loading_history: false,
            last_error: None,
            failed_attempts: 0,
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn items(&self) -> &[ChatItem] {
        &self.items
    }

    /// Token of the page to request next; `None` at end of history.
    /// Until the first page has loaded this is always the first page.
    pub fn next_token(&self) -> Option<PageToken> {
        if self.phase == StreamPhase::Closed {
            return None;
        }
        if !self.initial_loaded {
            return Some(PageToken::first());
        }
        self.next_page.clone()
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            topic: self.topic.clone(),
            phase: self.phase,
            items: self.items.clone(),
            has_more: self.phase != StreamPhase::Closed
                && (!self.initial_loaded || self.next_page.is_some()),
            is_live: self.is_live,
            loading_history: self.loading_history,
            last_error: self.last_error.clone(),
            failed_attempts: self.failed_attempts,
        }
    }

    // ── Merge ───────────────────────────────────────────────────────────────

    /// Insert by ordering key unless the id is known or deleted.
    fn insert(&mut self, item: ChatItem) -> bool {
        if self.ids.contains(&item.id) || self.tombstones.contains(&item.id) {
            return false;
        }
        let pos = self
            .items
            .partition_point(|x| x.cmp_key(item.created_at, &item.id).is_le());
        self.ids.insert(item.id.clone());
        self.items.insert(pos, item);
        true
    }

    fn remove(&mut self, id: &ItemId) -> Option<ChatItem> {
        if !self.ids.remove(id) {
            return None;
        }
        let pos = self.items.iter().position(|x| &x.id == id)?;
        Some(self.items.remove(pos))
    }

    fn apply_envelope(&mut self, envelope: LiveEnvelope) -> bool {
        match envelope {
            LiveEnvelope::New { item } => self.insert(item),
            LiveEnvelope::Edit { item } => {
                if self.remove(&item.id).is_some() {
                    self.insert(item)
                } else {
                    log::debug!(
                        "[chat-link] Edit for unknown item {} on {}",
                        item.id,
                        self.topic
                    );
                    false
                }
            },
            LiveEnvelope::Delete { id } => {
                let removed = self.remove(&id).is_some();
                self.tombstones.insert(id);
                removed
            },
        }
    }

    /// Feed one live envelope. Returns `true` if the visible items changed.
    pub fn apply_live(&mut self, envelope: LiveEnvelope) -> bool {
        match self.phase {
            StreamPhase::Closed => false,
            StreamPhase::Loading => {
                self.pending.push(envelope);
                false
            },
            StreamPhase::Ready | StreamPhase::Reconnecting => self.apply_envelope(envelope),
        }
    }

    /// Merge a history page. The first page also flushes buffered live
    /// envelopes and leaves `Loading`. Returns the number of items added.
    pub fn apply_page(&mut self, page: HistoryPage) -> usize {
        if self.phase == StreamPhase::Closed {
            return 0;
        }
        let before = self.items.len();
        for item in page.items {
            self.insert(item);
        }
        self.next_page = page.next;

        if !self.initial_loaded {
            self.initial_loaded = true;
            for envelope in std::mem::take(&mut self.pending) {
                self.apply_envelope(envelope);
            }
            self.phase = if self.interrupted {
                StreamPhase::Reconnecting
            } else {
                StreamPhase::Ready
            };
        }

        self.loading_history = false;
        self.last_error = None;
        self.failed_attempts = 0;
        self.items.len().saturating_sub(before)
    }

    // ── Connection signals ──────────────────────────────────────────────────

    pub fn mark_live(&mut self) -> bool {
        if self.phase == StreamPhase::Closed || (self.is_live && !self.interrupted) {
            return false;
        }
        self.is_live = true;
        self.interrupted = false;
        if self.phase == StreamPhase::Reconnecting {
            self.phase = StreamPhase::Ready;
        }
        true
    }

    pub fn mark_interrupted(&mut self) -> bool {
        if self.phase == StreamPhase::Closed {
            return false;
        }
        self.is_live = false;
        self.interrupted = true;
        if self.phase == StreamPhase::Ready {
            self.phase = StreamPhase::Reconnecting;
        }
        true
    }

    /// The connection manager gave up on this topic.
    pub fn mark_failed(&mut self, err: ChatLinkError) -> bool {
        if self.phase == StreamPhase::Closed {
            return false;
        }
        self.mark_interrupted();
        self.last_error = Some(err);
        true
    }

    // ── History fetch bookkeeping ───────────────────────────────────────────

    pub fn fetch_started(&mut self) -> bool {
        let changed = !self.loading_history;
        self.loading_history = true;
        changed
    }

    /// Record a failed attempt. `retrying` keeps `loading_history` set.
    pub fn fetch_failed(&mut self, err: HistoryFetchError, retrying: bool) {
        self.failed_attempts += 1;
        self.last_error = Some(err.into());
        self.loading_history = retrying;
    }

    pub fn close(&mut self) {
        self.phase = StreamPhase::Closed;
        self.pending.clear();
        self.items.clear();
        self.ids.clear();
        self.tombstones.clear();
        self.is_live = false;
        self.loading_history = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, ts: i64) -> ChatItem {
        ChatItem::new(id, ts, format!("m{}", id))
    }

    fn new(id: &str, ts: i64) -> LiveEnvelope {
        LiveEnvelope::New { item: item(id, ts) }
    }

    fn ids(stream: &ReconciledStream) -> Vec<&str> {
        stream.items().iter().map(|i| i.id.as_str()).collect()
    }

    fn ready_with(items: Vec<ChatItem>) -> ReconciledStream {
        let mut s = ReconciledStream::new(Topic::chat("1"));
        s.apply_page(HistoryPage::new(items, Some(PageToken::Page(1))));
        s
    }

    #[test]
    fn test_live_item_is_merged_by_timestamp() {
        let mut s = ready_with(vec![item("1", 100), item("2", 200)]);
        assert_eq!(s.phase(), StreamPhase::Ready);

        assert!(s.apply_live(new("3", 150)));
        assert_eq!(ids(&s), vec!["1", "3", "2"]);
    }

    #[test]
    fn test_duplicate_live_item_is_ignored() {
        let mut s = ready_with(vec![item("1", 100), item("2", 200)]);
        assert!(!s.apply_live(new("2", 200)));
        assert_eq!(s.items().len(), 2);
        assert!(!s.apply_live(new("2", 999)));
        assert_eq!(ids(&s), vec!["1", "2"]);
    }

    #[test]
    fn test_items_before_first_page_are_buffered() {
        let mut s = ReconciledStream::new(Topic::chat("1"));
        assert!(!s.apply_live(new("5", 500)));
        assert!(!s.apply_live(new("1", 100)));
        assert!(s.items().is_empty());
        assert_eq!(s.phase(), StreamPhase::Loading);

        let added = s.apply_page(HistoryPage::last(vec![item("1", 100), item("2", 200)]));
        assert_eq!(added, 3);
        assert_eq!(ids(&s), vec!["1", "2", "5"]);
        assert_eq!(s.phase(), StreamPhase::Ready);
        assert!(!s.snapshot().has_more);
    }

    #[test]
    fn test_buffered_edit_and_delete_apply_in_order() {
        let mut s = ReconciledStream::new(Topic::chat("1"));
        s.apply_live(new("9", 900));
        s.apply_live(LiveEnvelope::Edit {
            item: ChatItem::new("9", 900, "edited"),
        });
        s.apply_live(LiveEnvelope::Delete { id: "1".into() });

        s.apply_page(HistoryPage::last(vec![item("1", 100), item("2", 200)]));
        assert_eq!(ids(&s), vec!["2", "9"]);
        assert_eq!(s.items()[1].content, "edited");
    }

    #[test]
    fn test_edit_repositions_and_unknown_edit_is_ignored() {
        let mut s = ready_with(vec![item("1", 100), item("2", 200)]);
        let mut moved = ChatItem::new("1", 300, "later");
        moved.edited_at = Some(301);
        assert!(s.apply_live(LiveEnvelope::Edit { item: moved }));
        assert_eq!(ids(&s), vec!["2", "1"]);
        assert_eq!(s.items()[1].edited_at, Some(301));

        assert!(!s.apply_live(LiveEnvelope::Edit { item: item("42", 1) }));
        assert_eq!(s.items().len(), 2);
    }

    #[test]
    fn test_deleted_item_is_not_resurrected_by_older_page() {
        let mut s = ready_with(vec![item("5", 500)]);
        assert!(!s.apply_live(LiveEnvelope::Delete { id: "3".into() }));
        assert!(s.apply_live(LiveEnvelope::Delete { id: "5".into() }));
        assert!(s.items().is_empty());

        s.apply_page(HistoryPage::last(vec![item("3", 300), item("4", 400)]));
        assert_eq!(ids(&s), vec!["4"]);
        assert!(!s.apply_live(new("5", 500)));
    }

    #[test]
    fn test_older_page_merges_and_end_of_history() {
        let mut s = ready_with(vec![item("3", 300), item("4", 400)]);
        assert_eq!(s.next_token(), Some(PageToken::Page(1)));

        let added = s.apply_page(HistoryPage::last(vec![item("1", 100), item("3", 300)]));
        assert_eq!(added, 1);
        assert_eq!(ids(&s), vec!["1", "3", "4"]);
        assert_eq!(s.next_token(), None);
        assert!(!s.snapshot().has_more);
    }

    #[test]
    fn test_reconnecting_keeps_items_and_merges_live() {
        let mut s = ready_with(vec![item("1", 100)]);
        s.mark_live();
        assert!(s.mark_interrupted());
        assert_eq!(s.phase(), StreamPhase::Reconnecting);
        assert_eq!(s.items().len(), 1);
        assert!(!s.snapshot().is_live);

        assert!(s.apply_live(new("2", 200)));
        assert!(s.mark_live());
        assert_eq!(s.phase(), StreamPhase::Ready);
        assert_eq!(ids(&s), vec!["1", "2"]);
    }

    #[test]
    fn test_interrupted_while_loading_lands_in_reconnecting() {
        let mut s = ReconciledStream::new(Topic::chat("1"));
        s.mark_live();
        s.mark_interrupted();
        assert_eq!(s.phase(), StreamPhase::Loading);
        s.apply_page(HistoryPage::last(vec![item("1", 100)]));
        assert_eq!(s.phase(), StreamPhase::Reconnecting);
    }

    #[test]
    fn test_fetch_failure_bookkeeping() {
        let mut s = ReconciledStream::new(Topic::chat("1"));
        assert!(s.fetch_started());
        s.fetch_failed(HistoryFetchError::Timeout("x".into()), true);
        s.fetch_failed(HistoryFetchError::Timeout("x".into()), false);
        let snap = s.snapshot();
        assert_eq!(snap.failed_attempts, 2);
        assert!(!snap.loading_history);
        assert!(snap.last_error.is_some());
        assert!(snap.has_more);
        assert_eq!(s.next_token(), Some(PageToken::first()));

        s.apply_page(HistoryPage::last(vec![]));
        let snap = s.snapshot();
        assert_eq!(snap.failed_attempts, 0);
        assert!(snap.last_error.is_none());
    }

    #[test]
    fn test_closed_stream_ignores_everything() {
        let mut s = ready_with(vec![item("1", 100)]);
        s.close();
        assert_eq!(s.phase(), StreamPhase::Closed);
        assert!(!s.apply_live(new("2", 200)));
        assert_eq!(s.apply_page(HistoryPage::last(vec![item("3", 300)])), 0);
        assert!(s.items().is_empty());
        assert_eq!(s.next_token(), None);
        assert!(!s.mark_live());
    }

    #[test]
    fn test_output_is_sorted_and_unique_for_mixed_input() {
        let mut s = ReconciledStream::new(Topic::chat("1"));
        let live = [("7", 70), ("3", 30), ("7", 70), ("5", 50), ("1", 10)];
        for (id, ts) in live {
            s.apply_live(new(id, ts));
        }
        s.apply_page(HistoryPage::new(
            vec![item("3", 30), item("2", 20), item("6", 60), item("4", 40)],
            Some(PageToken::Page(1)),
        ));
        for (id, ts) in [("8", 80), ("2", 20), ("0", 0)] {
            s.apply_live(new(id, ts));
        }

        let keys: Vec<i64> = s.items().iter().map(|i| i.created_at).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        let unique: HashSet<&str> = ids(&s).into_iter().collect();
        assert_eq!(unique.len(), s.items().len());
        assert_eq!(s.items().len(), 9);
    }
}
