//! Per-topic reconciler task.
//!
//! A [`TopicStream`] owns one background task that holds the topic's
//! [`ReconciledStream`], its [`TopicSubscription`] and at most one history
//! fetch. Consumers read published [`StreamSnapshot`]s and send commands.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant as TokioInstant;

use super::stream::{ReconciledStream, StreamPhase, StreamSnapshot};
use crate::connection::{ConnectionManager, TopicSubscription};
use crate::error::{ChatLinkError, Result};
use crate::history::{HistoryFetchError, HistoryLoader};
use crate::models::{ChatItem, HistoryPage, StreamOptions, Topic};
use crate::registry::TopicEvent;

/// Result of [`TopicStream::load_more`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadMoreOutcome {
    /// A page was merged; `added` items were new.
    Loaded { added: usize },
    /// History is exhausted. No request was made.
    NoMoreHistory,
    /// The fetch failed after all allowed attempts.
    Failed(HistoryFetchError),
    /// The stream was closed before the fetch finished.
    Closed,
}

enum StreamCmd {
    LoadMore {
        reply: oneshot::Sender<LoadMoreOutcome>,
    },
    Close {
        done: Option<oneshot::Sender<()>>,
    },
}

type FetchResult = std::result::Result<HistoryPage, HistoryFetchError>;

enum Fetch {
    Idle,
    InFlight {
        attempt: u32,
        handle: JoinHandle<FetchResult>,
    },
    Backoff {
        attempt: u32,
        until: TokioInstant,
    },
}

enum Wake {
    Cmd(Option<StreamCmd>),
    Event(Option<TopicEvent>),
    Fetched(FetchResult),
    RetryDue,
}

// ── TopicStream (public handle) ─────────────────────────────────────────────

/// A reconciled, live view of one topic.
///
/// History is requested as soon as the stream opens; live items arriving
/// before it are buffered. Dropping the handle closes the stream.
pub struct TopicStream {
    topic: Topic,
    snapshot_rx: watch::Receiver<StreamSnapshot>,
    cmd_tx: mpsc::Sender<StreamCmd>,
    connection: Arc<ConnectionManager>,
    _task: JoinHandle<()>,
}

impl TopicStream {
    /// Subscribe `topic` on `connection` and start loading its history.
    pub async fn open(
        connection: Arc<ConnectionManager>,
        loader: Arc<dyn HistoryLoader>,
        topic: Topic,
        options: StreamOptions,
    ) -> Result<Self> {
        let subscription = connection
            .subscribe_with_capacity(topic.clone(), options.event_channel_capacity)
            .await?;

        let state = ReconciledStream::new(topic.clone());
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let task = StreamTask {
            topic: topic.clone(),
            state,
            subscription,
            events_open: true,
            loader,
            options,
            cmd_rx,
            snapshot_tx,
            fetch: Fetch::Idle,
            waiters: Vec::new(),
        };
        let task = tokio::spawn(task.run());

        Ok(Self {
            topic,
            snapshot_rx,
            cmd_tx,
            connection,
            _task: task,
        })
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn items(&self) -> Vec<ChatItem> {
        self.snapshot_rx.borrow().items.clone()
    }

    pub fn has_more(&self) -> bool {
        self.snapshot_rx.borrow().has_more
    }

    pub fn is_live(&self) -> bool {
        self.snapshot_rx.borrow().is_live
    }

    pub fn phase(&self) -> StreamPhase {
        self.snapshot_rx.borrow().phase
    }

    /// Wait for the next published snapshot. `None` once the stream task
    /// has finished.
    pub async fn changed(&mut self) -> Option<StreamSnapshot> {
        self.snapshot_rx.changed().await.ok()?;
        Some(self.snapshot_rx.borrow_and_update().clone())
    }

    /// Fetch the next older page, or join the fetch already running.
    pub async fn load_more(&self) -> LoadMoreOutcome {
        let (reply, reply_rx) = oneshot::channel();
        if self.cmd_tx.send(StreamCmd::LoadMore { reply }).await.is_err() {
            return LoadMoreOutcome::Closed;
        }
        reply_rx.await.unwrap_or(LoadMoreOutcome::Closed)
    }

    /// Publish `content` on this topic.
    pub async fn send_item(&self, content: impl Into<String>) -> Result<()> {
        if self.phase() == StreamPhase::Closed {
            return Err(ChatLinkError::Closed(format!("Stream {} is closed", self.topic)));
        }
        self.connection.publish(&self.topic, content).await
    }

    /// Detach from the topic. Pending fetches are aborted and their results
    /// discarded. Idempotent.
    pub async fn close(&self) {
        let (done, done_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(StreamCmd::Close { done: Some(done) })
            .await
            .is_ok()
        {
            let _ = done_rx.await;
        }
    }
}

// ── Reconciler task ─────────────────────────────────────────────────────────

struct StreamTask {
    topic: Topic,
    state: ReconciledStream,
    subscription: TopicSubscription,
    /// `false` once the connection manager stopped delivering events.
    events_open: bool,
    loader: Arc<dyn HistoryLoader>,
    options: StreamOptions,
    cmd_rx: mpsc::Receiver<StreamCmd>,
    snapshot_tx: watch::Sender<StreamSnapshot>,
    fetch: Fetch,
    waiters: Vec<oneshot::Sender<LoadMoreOutcome>>,
}

impl StreamTask {
    async fn run(mut self) {
        self.start_fetch(1);
        self.publish();

        loop {
            let wake = {
                let retry_at = match &self.fetch {
                    Fetch::Backoff { until, .. } => Some(*until),
                    _ => None,
                };
                let fetch = &mut self.fetch;
                let fetched = async move {
                    match fetch {
                        Fetch::InFlight { handle, .. } => match handle.await {
                            Ok(result) => result,
                            Err(e) => Err(HistoryFetchError::Network(format!(
                                "History task failed: {}",
                                e
                            ))),
                        },
                        _ => std::future::pending().await,
                    }
                };
                let retry_due = async move {
                    match retry_at {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                };

                tokio::select! {
                    biased;

                    cmd = self.cmd_rx.recv() => Wake::Cmd(cmd),
                    event = self.subscription.next(), if self.events_open => Wake::Event(event),
                    result = fetched => Wake::Fetched(result),
                    _ = retry_due => Wake::RetryDue,
                }
            };

            match wake {
                Wake::Cmd(None) => {
                    self.shutdown().await;
                    return;
                },
                Wake::Cmd(Some(StreamCmd::Close { done })) => {
                    self.shutdown().await;
                    if let Some(done) = done {
                        let _ = done.send(());
                    }
                    return;
                },
                Wake::Cmd(Some(StreamCmd::LoadMore { reply })) => self.load_more(reply),
                Wake::Event(event) => self.handle_event(event),
                Wake::Fetched(result) => self.handle_fetched(result),
                Wake::RetryDue => {
                    if let Fetch::Backoff { attempt, .. } = self.fetch {
                        self.start_fetch(attempt + 1);
                    }
                },
            }
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.state.snapshot());
    }

    fn start_fetch(&mut self, attempt: u32) {
        let Some(token) = self.state.next_token() else {
            self.fetch = Fetch::Idle;
            return;
        };
        log::debug!(
            "[chat-link] Loading history of {} ({}, attempt {})",
            self.topic,
            token,
            attempt
        );
        let loader = Arc::clone(&self.loader);
        let topic = self.topic.clone();
        let handle = tokio::spawn(async move { loader.load_page(&topic, &token).await });
        self.fetch = Fetch::InFlight { attempt, handle };
        self.state.fetch_started();
    }

    fn load_more(&mut self, reply: oneshot::Sender<LoadMoreOutcome>) {
        if !matches!(self.fetch, Fetch::Idle) {
            self.waiters.push(reply);
            return;
        }
        if self.state.next_token().is_none() {
            let _ = reply.send(LoadMoreOutcome::NoMoreHistory);
            return;
        }
        self.waiters.push(reply);
        self.start_fetch(1);
        self.publish();
    }

    fn reply_all(&mut self, outcome: LoadMoreOutcome) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }
    }

    fn handle_fetched(&mut self, result: FetchResult) {
        let attempt = match self.fetch {
            Fetch::InFlight { attempt, .. } => attempt,
            _ => return,
        };

        match result {
            Ok(page) => {
                self.fetch = Fetch::Idle;
                let added = self.state.apply_page(page);
                log::debug!("[chat-link] Merged {} history items into {}", added, self.topic);
                self.publish();
                self.reply_all(LoadMoreOutcome::Loaded { added });
            },
            Err(err) => {
                let retry = err.is_transient() && attempt < self.options.history_max_attempts;
                log::warn!(
                    "[chat-link] History fetch for {} failed (attempt {}/{}): {}",
                    self.topic,
                    attempt,
                    self.options.history_max_attempts,
                    err
                );
                self.state.fetch_failed(err.clone(), retry);
                if retry {
                    let delay = self.options.history_retry_delay(attempt);
                    self.fetch = Fetch::Backoff {
                        attempt,
                        until: TokioInstant::now() + delay,
                    };
                    self.publish();
                } else {
                    self.fetch = Fetch::Idle;
                    self.publish();
                    self.reply_all(LoadMoreOutcome::Failed(err));
                }
            },
        }
    }

    fn handle_event(&mut self, event: Option<TopicEvent>) {
        let changed = match event {
            Some(TopicEvent::Live) => self.state.mark_live(),
            Some(TopicEvent::Envelope(envelope)) => self.state.apply_live(envelope),
            Some(TopicEvent::Interrupted(reason)) => {
                log::debug!("[chat-link] Stream {} interrupted: {}", self.topic, reason);
                self.state.mark_interrupted()
            },
            Some(TopicEvent::Failed(err)) => self.state.mark_failed(err),
            None => {
                self.events_open = false;
                self.state.mark_interrupted()
            },
        };
        if changed {
            self.publish();
        }
    }

    async fn shutdown(&mut self) {
        if let Fetch::InFlight { handle, .. } = &self.fetch {
            handle.abort();
        }
        self.fetch = Fetch::Idle;
        self.subscription.close().await;
        self.state.close();
        self.publish();
        self.reply_all(LoadMoreOutcome::Closed);
        log::debug!("[chat-link] Stream {} closed", self.topic);
    }
}

impl Drop for StreamTask {
    fn drop(&mut self) {
        if let Fetch::InFlight { handle, .. } = &self.fetch {
            handle.abort();
        }
    }
}
