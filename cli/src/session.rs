//! Interactive tail session
//!
//! Reads lines from stdin and prints the stream as it changes:
//!
//! - `:more` loads the next page of older history
//! - `:quit` (or end of input) closes the stream and exits
//! - any other non-empty line is posted to the topic

use std::collections::HashMap;

use chat_link::{ChatItem, ItemId, LoadMoreOutcome, StreamPhase, StreamSnapshot, TopicStream};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::{CLIError, Result};

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    More,
    Quit,
    Empty,
    Send(String),
}

pub fn parse_input(line: &str) -> InputCommand {
    let trimmed = line.trim();
    match trimmed {
        "" => InputCommand::Empty,
        ":more" | ":m" => InputCommand::More,
        ":quit" | ":q" | ":exit" => InputCommand::Quit,
        _ => InputCommand::Send(trimmed.to_string()),
    }
}

fn format_item(item: &ChatItem) -> String {
    let sender = item.sender_id.as_deref().unwrap_or("?");
    format!("[{}] {}: {}", item.created_at, sender, item.content)
}

fn phase_label(phase: StreamPhase) -> &'static str {
    match phase {
        StreamPhase::Loading => "loading history",
        StreamPhase::Ready => "ready",
        StreamPhase::Reconnecting => "reconnecting",
        StreamPhase::Closed => "closed",
    }
}

/// Turns successive snapshots into printable lines, reporting only what
/// changed since the previous call.
#[derive(Debug, Default)]
pub struct SnapshotRenderer {
    seen: HashMap<ItemId, ChatItem>,
    phase: Option<StreamPhase>,
    is_live: bool,
    failed_attempts: u32,
}

impl SnapshotRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, snapshot: &StreamSnapshot) -> Vec<String> {
        let mut lines = Vec::new();

        if self.phase != Some(snapshot.phase) {
            lines.push(format!("-- {} --", phase_label(snapshot.phase)));
            self.phase = Some(snapshot.phase);
        }

        if snapshot.is_live != self.is_live {
            lines.push(if snapshot.is_live {
                "-- live --".to_string()
            } else {
                "-- offline --".to_string()
            });
            self.is_live = snapshot.is_live;
        }

        if snapshot.failed_attempts > self.failed_attempts {
            if let Some(err) = &snapshot.last_error {
                lines.push(format!("! {}", CLIError::from(err.clone())));
            }
        }
        self.failed_attempts = snapshot.failed_attempts;

        // A closed stream drops its items; that is not a deletion.
        if snapshot.phase == StreamPhase::Closed {
            self.seen.clear();
            return lines;
        }

        let mut current: HashMap<ItemId, ChatItem> = HashMap::with_capacity(snapshot.items.len());
        for item in &snapshot.items {
            match self.seen.get(&item.id) {
                None => lines.push(format_item(item)),
                Some(previous)
                    if previous.content != item.content || previous.edited_at != item.edited_at =>
                {
                    lines.push(format!("{} (edited)", format_item(item)));
                }
                Some(_) => {}
            }
            current.insert(item.id.clone(), item.clone());
        }

        let mut removed: Vec<&ItemId> = self
            .seen
            .keys()
            .filter(|id| !current.contains_key(*id))
            .collect();
        removed.sort();
        for id in removed {
            lines.push(format!("-- deleted {} --", id));
        }

        self.seen = current;
        lines
    }
}

fn describe_outcome(outcome: &LoadMoreOutcome) -> String {
    match outcome {
        LoadMoreOutcome::Loaded { added } => format!("-- loaded {} older items --", added),
        LoadMoreOutcome::NoMoreHistory => "-- beginning of history --".to_string(),
        LoadMoreOutcome::Failed(e) => format!("! Could not load history: {}", e),
        LoadMoreOutcome::Closed => "-- closed --".to_string(),
    }
}

/// Interactive session over one topic stream.
pub struct TailSession {
    stream: TopicStream,
    renderer: SnapshotRenderer,
}

enum Wake {
    Line(std::io::Result<Option<String>>),
    Snapshot(Option<StreamSnapshot>),
}

impl TailSession {
    pub fn new(stream: TopicStream) -> Self {
        Self {
            stream,
            renderer: SnapshotRenderer::new(),
        }
    }

    fn print(&mut self, snapshot: &StreamSnapshot) {
        for line in self.renderer.render(snapshot) {
            println!("{}", line);
        }
    }

    /// Run until `:quit`, end of input, or the stream closes.
    pub async fn run(mut self) -> Result<()> {
        println!("Following {}. Type :more for older history, :quit to exit.", self.stream.topic());
        let initial = self.stream.snapshot();
        self.print(&initial);

        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            let wake = tokio::select! {
                line = lines.next_line() => Wake::Line(line),
                snapshot = self.stream.changed() => Wake::Snapshot(snapshot),
            };

            match wake {
                Wake::Line(Ok(Some(line))) => match parse_input(&line) {
                    InputCommand::Empty => {}
                    InputCommand::Quit => break,
                    InputCommand::More => {
                        let outcome = self.stream.load_more().await;
                        println!("{}", describe_outcome(&outcome));
                        if outcome == LoadMoreOutcome::Closed {
                            break;
                        }
                    }
                    InputCommand::Send(content) => {
                        if let Err(e) = self.stream.send_item(content).await {
                            eprintln!("! {}", CLIError::from(e));
                        }
                    }
                },
                Wake::Line(Ok(None)) => break,
                Wake::Line(Err(e)) => {
                    self.stream.close().await;
                    return Err(e.into());
                }
                Wake::Snapshot(Some(snapshot)) => self.print(&snapshot),
                Wake::Snapshot(None) => break,
            }
        }

        self.stream.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_link::{ChatLinkError, HistoryFetchError, Topic};

    fn snapshot(phase: StreamPhase, items: Vec<ChatItem>) -> StreamSnapshot {
        StreamSnapshot {
            topic: Topic::chat("1"),
            phase,
            items,
            has_more: true,
            is_live: false,
            loading_history: false,
            last_error: None,
            failed_attempts: 0,
        }
    }

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input("  "), InputCommand::Empty);
        assert_eq!(parse_input(":more"), InputCommand::More);
        assert_eq!(parse_input(":q"), InputCommand::Quit);
        assert_eq!(parse_input(" hello there \n"), InputCommand::Send("hello there".into()));
    }

    #[test]
    fn test_renderer_prints_only_new_items() {
        let mut renderer = SnapshotRenderer::new();
        let first = renderer.render(&snapshot(
            StreamPhase::Ready,
            vec![ChatItem::new("a", 100, "hi").with_sender("ann")],
        ));
        assert_eq!(first, vec!["-- ready --", "[100] ann: hi"]);

        let second = renderer.render(&snapshot(
            StreamPhase::Ready,
            vec![
                ChatItem::new("a", 100, "hi").with_sender("ann"),
                ChatItem::new("b", 200, "yo"),
            ],
        ));
        assert_eq!(second, vec!["[200] ?: yo"]);
    }

    #[test]
    fn test_renderer_reports_edits_and_deletes() {
        let mut renderer = SnapshotRenderer::new();
        renderer.render(&snapshot(
            StreamPhase::Ready,
            vec![ChatItem::new("a", 100, "hi"), ChatItem::new("b", 200, "yo")],
        ));

        let lines = renderer.render(&snapshot(
            StreamPhase::Ready,
            vec![ChatItem::new("a", 100, "hi!")],
        ));
        assert_eq!(lines, vec!["[100] ?: hi! (edited)", "-- deleted b --"]);
    }

    #[test]
    fn test_renderer_status_changes() {
        let mut renderer = SnapshotRenderer::new();
        let mut snap = snapshot(StreamPhase::Loading, Vec::new());
        assert_eq!(renderer.render(&snap), vec!["-- loading history --"]);

        snap.is_live = true;
        assert_eq!(renderer.render(&snap), vec!["-- live --"]);

        snap.failed_attempts = 1;
        snap.last_error = Some(ChatLinkError::from(HistoryFetchError::Network(
            "connection reset".into(),
        )));
        let lines = renderer.render(&snap);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("! Could not load history"));

        // Same failure count again prints nothing
        assert!(renderer.render(&snap).is_empty());
    }

    #[test]
    fn test_closed_stream_is_not_reported_as_deletions() {
        let mut renderer = SnapshotRenderer::new();
        renderer.render(&snapshot(StreamPhase::Ready, vec![ChatItem::new("a", 1, "x")]));
        let lines = renderer.render(&snapshot(StreamPhase::Closed, Vec::new()));
        assert_eq!(lines, vec!["-- closed --"]);
    }

    #[test]
    fn test_describe_outcome() {
        assert_eq!(
            describe_outcome(&LoadMoreOutcome::Loaded { added: 3 }),
            "-- loaded 3 older items --"
        );
        assert_eq!(
            describe_outcome(&LoadMoreOutcome::NoMoreHistory),
            "-- beginning of history --"
        );
    }
}
