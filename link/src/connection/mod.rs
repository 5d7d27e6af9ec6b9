//! Broker connection management.
//!
//! [`ConnectionManager`] is the public handle; the work happens in a
//! background task ([`shared`]) that owns the single transport session and
//! the subscription registry. The handle talks to it over a command channel.

mod shared;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::auth::{CredentialSlot, ResolvedAuth};
use crate::error::{ChatLinkError, Result};
use crate::event_handlers::EventHandlers;
use crate::models::{ConnectionOptions, OutgoingItem, SubscriptionInfo, Topic, TopicRoutes};
use crate::registry::{HandlerId, TopicEvent};
use crate::stomp::{self, Frame};
use crate::timeouts::ChatLinkTimeouts;
use crate::transport::Connector;

/// Default capacity for topic event channels.
pub(crate) const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Lifecycle of the broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// First connection attempt in progress.
    Connecting,
    /// Session established and every active topic subscribed.
    Connected,
    /// Session lost; `attempt` counts reconnection attempts since the last
    /// successful session.
    Reconnecting { attempt: u32 },
    /// Closed by `disconnect()`, gave up, or lost with auto-reconnect off.
    Disconnected,
}

// ── Commands ────────────────────────────────────────────────────────────────

/// Commands sent from the public API to the background connection task.
pub(crate) enum ConnCmd {
    Subscribe {
        topic: Topic,
        event_tx: mpsc::Sender<TopicEvent>,
        result_tx: oneshot::Sender<Result<HandlerId>>,
    },
    Unsubscribe {
        topic: Topic,
        handler_id: HandlerId,
    },
    Publish {
        frame: Frame,
        result_tx: oneshot::Sender<Result<()>>,
    },
    /// Drop the session and reconnect now with freshly resolved credentials.
    Reconnect,
    ListSubscriptions {
        result_tx: oneshot::Sender<Vec<SubscriptionInfo>>,
    },
    Shutdown {
        done_tx: Option<oneshot::Sender<()>>,
    },
}

fn task_gone() -> ChatLinkError {
    ChatLinkError::Closed("Connection task is not running".to_string())
}

// ── ConnectionManager (public handle) ───────────────────────────────────────

/// Owns the single broker connection shared by every topic.
///
/// Connection failures never surface as errors from this type; they are
/// reported through [`EventHandlers`] and [`state_changes`](Self::state_changes)
/// while the manager keeps retrying.
pub struct ConnectionManager {
    cmd_tx: mpsc::Sender<ConnCmd>,
    state_rx: watch::Receiver<ConnectionState>,
    credentials: CredentialSlot,
    routes: TopicRoutes,
    _task: JoinHandle<()>,
}

impl ConnectionManager {
    /// Spawn the connection task and wait for its first attempt to finish.
    ///
    /// A failed first attempt is reported through `on_error` and retried
    /// according to `options`.
    pub async fn connect(
        connector: Arc<dyn Connector>,
        credentials: CredentialSlot,
        options: ConnectionOptions,
        timeouts: ChatLinkTimeouts,
        event_handlers: EventHandlers,
        routes: TopicRoutes,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel::<ConnCmd>(256);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (ready_tx, ready_rx) = oneshot::channel::<()>();

        let task = shared::ConnectionTask::new(
            cmd_rx,
            connector,
            credentials.clone(),
            options,
            timeouts,
            event_handlers,
            routes.clone(),
            state_tx,
        );
        let task = tokio::spawn(task.run(ready_tx));

        if ready_rx.await.is_err() {
            log::warn!("[chat-link] Connection task exited before signalling readiness");
        }

        Self {
            cmd_tx,
            state_rx,
            credentials,
            routes,
            _task: task,
        }
    }

    /// Register a handler for `topic`.
    ///
    /// The first handler of a topic subscribes it on the broker; later ones
    /// share that subscription. Works while disconnected: the topic is
    /// subscribed as soon as a session is up.
    pub async fn subscribe(&self, topic: Topic) -> Result<TopicSubscription> {
        self.subscribe_with_capacity(topic, DEFAULT_EVENT_CHANNEL_CAPACITY)
            .await
    }

    pub async fn subscribe_with_capacity(
        &self,
        topic: Topic,
        capacity: usize,
    ) -> Result<TopicSubscription> {
        let (event_tx, event_rx) = mpsc::channel(capacity.max(1));
        let (result_tx, result_rx) = oneshot::channel();

        self.cmd_tx
            .send(ConnCmd::Subscribe {
                topic: topic.clone(),
                event_tx,
                result_tx,
            })
            .await
            .map_err(|_| task_gone())?;

        let handler_id = result_rx.await.map_err(|_| task_gone())??;

        Ok(TopicSubscription {
            topic,
            handler_id,
            events: event_rx,
            cmd_tx: self.cmd_tx.clone(),
            closed: false,
        })
    }

    /// Send `content` on `topic` to the configured send destination.
    ///
    /// Fails with `TransportError` when no session is live.
    pub async fn publish(&self, topic: &Topic, content: impl Into<String>) -> Result<()> {
        let body = serde_json::to_string(&OutgoingItem::new(topic.clone(), content))?;
        let frame = stomp::send_frame(&self.routes.send_destination, body);
        let (result_tx, result_rx) = oneshot::channel();

        self.cmd_tx
            .send(ConnCmd::Publish { frame, result_tx })
            .await
            .map_err(|_| task_gone())?;
        result_rx.await.map_err(|_| task_gone())?
    }

    /// The credential source changed: drop the current session and
    /// reconnect immediately. Active topics are replayed automatically.
    pub async fn on_credential_change(&self) {
        if self.cmd_tx.send(ConnCmd::Reconnect).await.is_err() {
            log::debug!("[chat-link] Credential change ignored, connection task is gone");
        }
    }

    /// Swap the credential, then behave as [`on_credential_change`](Self::on_credential_change).
    pub async fn rotate_credentials(&self, auth: impl Into<ResolvedAuth>) {
        self.credentials.replace(auth);
        self.on_credential_change().await;
    }

    /// Close the session and stop reconnecting. Open [`TopicSubscription`]s
    /// end (`next()` returns `None`).
    pub async fn disconnect(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(ConnCmd::Shutdown {
                done_tx: Some(done_tx),
            })
            .await
            .is_ok()
        {
            let _ = done_rx.await;
        }
    }

    pub async fn list_subscriptions(&self) -> Vec<SubscriptionInfo> {
        let (result_tx, result_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(ConnCmd::ListSubscriptions { result_tx })
            .await
            .is_err()
        {
            return Vec::new();
        }
        result_rx.await.unwrap_or_default()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every state change.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The credential slot shared with the history loader.
    pub fn credentials(&self) -> &CredentialSlot {
        &self.credentials
    }

    pub fn routes(&self) -> &TopicRoutes {
        &self.routes
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let _ = self.cmd_tx.try_send(ConnCmd::Shutdown { done_tx: None });
    }
}

// ── TopicSubscription (handler handle) ──────────────────────────────────────

/// One handler's view of a topic.
///
/// Dropping the handle unsubscribes it; the wire subscription goes away
/// when the last handle of the topic does.
pub struct TopicSubscription {
    topic: Topic,
    handler_id: HandlerId,
    events: mpsc::Receiver<TopicEvent>,
    cmd_tx: mpsc::Sender<ConnCmd>,
    closed: bool,
}

impl TopicSubscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Next event, or `None` once the connection manager is gone.
    pub async fn next(&mut self) -> Option<TopicEvent> {
        self.events.recv().await
    }

    /// Unsubscribe and wait until the connection task has the request.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.events.close();
        let _ = self
            .cmd_tx
            .send(ConnCmd::Unsubscribe {
                topic: self.topic.clone(),
                handler_id: self.handler_id,
            })
            .await;
    }
}

impl Drop for TopicSubscription {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Fire-and-forget; if the queue is full the registry prunes the
        // handler on its next delivery.
        if self
            .cmd_tx
            .try_send(ConnCmd::Unsubscribe {
                topic: self.topic.clone(),
                handler_id: self.handler_id,
            })
            .is_err()
        {
            log::debug!(
                "[chat-link] Deferred unsubscribe of {} to registry pruning",
                self.topic
            );
        }
    }
}
