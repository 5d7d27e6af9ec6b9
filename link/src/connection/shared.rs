//! Background connection task.
//!
//! One task per [`ConnectionManager`](super::ConnectionManager). Handles:
//!
//! - A single STOMP session shared by every topic
//! - Routing `MESSAGE` frames to topic handlers through the registry
//! - Reconnection with exponential backoff, and immediate reconnection on
//!   credential change
//! - Replay of every active topic before a new session is reported as up
//! - STOMP heart-beats in both directions

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant as TokioInstant;

use super::{ConnCmd, ConnectionState};
use crate::auth::CredentialSlot;
use crate::error::{ChatLinkError, Result};
use crate::event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
use crate::models::{ConnectionOptions, TopicRoutes};
use crate::registry::SubscriptionRegistry;
use crate::stomp::{self, Command, Frame, Inbound};
use crate::timeouts::{with_limit, ChatLinkTimeouts};
use crate::transport::{Connector, SessionEvent, TransportSession};

/// A duration far enough in the future (~100 years) to act as "never" for
/// deadline calculations without overflowing `Instant::now() + dur`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

const DISCONNECT_RECEIPT: &str = "chat-link-disconnect";

/// What woke the online loop.
enum Wake {
    Cmd(Option<ConnCmd>),
    Session(Result<SessionEvent>),
    SendHeartbeat,
    PeerSilent,
}

pub(super) struct ConnectionTask {
    cmd_rx: mpsc::Receiver<ConnCmd>,
    connector: Arc<dyn Connector>,
    credentials: CredentialSlot,
    options: ConnectionOptions,
    timeouts: ChatLinkTimeouts,
    event_handlers: EventHandlers,
    registry: SubscriptionRegistry,
    state_tx: watch::Sender<ConnectionState>,

    session: Option<Box<dyn TransportSession>>,
    /// Reconnection attempts since the last successful session.
    attempt: u32,
    /// Skip the backoff for the next attempt.
    reconnect_now: bool,
    /// Max attempts reached; wait for a credential change or shutdown.
    given_up: bool,
    shutdown: Option<Option<oneshot::Sender<()>>>,

    heartbeat_every: Option<Duration>,
    dead_after: Option<Duration>,
    next_heartbeat_at: TokioInstant,
    peer_deadline: TokioInstant,
}

impl ConnectionTask {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        cmd_rx: mpsc::Receiver<ConnCmd>,
        connector: Arc<dyn Connector>,
        credentials: CredentialSlot,
        options: ConnectionOptions,
        timeouts: ChatLinkTimeouts,
        event_handlers: EventHandlers,
        routes: TopicRoutes,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        let now = TokioInstant::now();
        Self {
            cmd_rx,
            connector,
            credentials,
            options,
            timeouts,
            event_handlers,
            registry: SubscriptionRegistry::new(routes),
            state_tx,
            session: None,
            attempt: 0,
            reconnect_now: false,
            given_up: false,
            shutdown: None,
            heartbeat_every: None,
            dead_after: None,
            next_heartbeat_at: now + FAR_FUTURE,
            peer_deadline: now + FAR_FUTURE,
        }
    }

    pub(super) async fn run(mut self, ready_tx: oneshot::Sender<()>) {
        self.set_state(ConnectionState::Connecting);
        if let Err(e) = self.try_connect().await {
            log::warn!("[chat-link] Initial connection failed: {}", e);
            if !self.options.auto_reconnect {
                self.set_state(ConnectionState::Disconnected);
            }
        }
        let _ = ready_tx.send(());

        loop {
            if self.shutdown.is_some() {
                self.teardown().await;
                return;
            }
            if self.session.is_some() {
                self.drive_session().await;
            } else {
                self.reconnect_or_wait().await;
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    // ── Session establishment ───────────────────────────────────────────────

    async fn try_connect(&mut self) -> Result<()> {
        let auth = match self.credentials.resolve().await {
            Ok(auth) => auth,
            Err(e) => {
                self.event_handlers
                    .emit_error(ConnectionError::new(format!("Credential lookup failed: {}", e), true));
                return Err(e);
            },
        };

        let mut session = match self.connector.connect(&auth).await {
            Ok(session) => session,
            Err(e) => {
                log::warn!("[chat-link] Connection attempt failed: {}", e);
                self.event_handlers
                    .emit_error(ConnectionError::new(e.to_string(), true));
                return Err(e);
            },
        };

        // Apply everything queued while offline first, so a topic released
        // during the reconnect is not resubscribed.
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            self.handle_cmd(Some(cmd)).await;
        }
        if self.shutdown.is_some() {
            session.close().await;
            return Err(ChatLinkError::Closed("Shutdown during connect".into()));
        }
        if self.reconnect_now {
            // Credentials changed while dialling; this session is stale.
            session.close().await;
            return Err(ChatLinkError::AuthenticationError(
                "Credentials changed during connect".into(),
            ));
        }

        let frames = self.registry.replay();
        log::info!(
            "[chat-link] Session up, subscribing {} active topic(s)",
            frames.len()
        );
        let hb = session.heartbeat();
        self.session = Some(session);
        self.heartbeat_every = hb.outgoing;
        self.dead_after = hb.dead_after();
        self.touch_peer();
        self.touch_heartbeat();

        for frame in &frames {
            if let Err(e) = self.send(frame).await {
                log::warn!("[chat-link] Replay failed: {}", e);
                self.lose_session(DisconnectReason::new(format!("Replay failed: {}", e)))
                    .await;
                return Err(e);
            }
        }

        self.attempt = 0;
        self.given_up = false;
        self.registry.announce_live().await;
        self.set_state(ConnectionState::Connected);
        self.event_handlers.emit_connect();
        Ok(())
    }

    async fn reconnect_or_wait(&mut self) {
        if self.reconnect_now {
            self.reconnect_now = false;
            self.attempt = 0;
            self.set_state(ConnectionState::Reconnecting { attempt: 0 });
            let _ = self.try_connect().await;
            return;
        }

        if !self.options.auto_reconnect || self.given_up {
            self.set_state(ConnectionState::Disconnected);
            let cmd = self.cmd_rx.recv().await;
            self.handle_cmd(cmd).await;
            return;
        }

        if let Some(max) = self.options.max_reconnect_attempts {
            if self.attempt >= max {
                self.give_up(max).await;
                return;
            }
        }

        let delay = self.options.reconnect_delay(self.attempt);
        self.attempt += 1;
        self.set_state(ConnectionState::Reconnecting {
            attempt: self.attempt,
        });
        log::info!(
            "[chat-link] Attempting reconnection in {}ms (attempt {})",
            delay.as_millis(),
            self.attempt
        );

        let sleep_fut = tokio::time::sleep(delay);
        tokio::pin!(sleep_fut);
        loop {
            tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => {
                    self.handle_cmd(cmd).await;
                    if self.shutdown.is_some() {
                        return;
                    }
                    if self.reconnect_now {
                        self.reconnect_now = false;
                        break;
                    }
                }
                _ = &mut sleep_fut => break,
            }
        }

        if let Err(e) = self.try_connect().await {
            log::warn!("[chat-link] Reconnection attempt {} failed: {}", self.attempt, e);
        }
    }

    async fn give_up(&mut self, max: u32) {
        let msg = format!("Max reconnection attempts ({}) reached", max);
        log::warn!("[chat-link] {}", msg);
        self.event_handlers
            .emit_error(ConnectionError::new(msg.clone(), false));
        self.registry
            .fail_all(ChatLinkError::TransportError(msg))
            .await;
        self.given_up = true;
        self.set_state(ConnectionState::Disconnected);
    }

    // ── Online loop ─────────────────────────────────────────────────────────

    async fn drive_session(&mut self) {
        let wake = {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            let heartbeat_sleep = tokio::time::sleep_until(self.next_heartbeat_at);
            tokio::pin!(heartbeat_sleep);
            let peer_sleep = tokio::time::sleep_until(self.peer_deadline);
            tokio::pin!(peer_sleep);

            tokio::select! {
                biased;

                _ = &mut peer_sleep, if self.dead_after.is_some() => Wake::PeerSilent,
                cmd = self.cmd_rx.recv() => Wake::Cmd(cmd),
                _ = &mut heartbeat_sleep, if self.heartbeat_every.is_some() => Wake::SendHeartbeat,
                event = session.next_event() => Wake::Session(event),
            }
        };

        match wake {
            Wake::PeerSilent => {
                let msg = format!(
                    "No heart-beat from broker within {:?}",
                    self.dead_after.unwrap_or_default()
                );
                log::warn!("[chat-link] {}", msg);
                self.lose_session(DisconnectReason::new(msg)).await;
            },
            Wake::Cmd(cmd) => self.handle_cmd(cmd).await,
            Wake::SendHeartbeat => {
                let result = match self.session.as_mut() {
                    Some(session) => {
                        with_limit(self.timeouts.send_timeout, session.send_heartbeat()).await
                    },
                    None => return,
                };
                match result {
                    Some(Ok(())) => self.touch_heartbeat(),
                    Some(Err(e)) => {
                        self.lose_session(DisconnectReason::new(format!(
                            "Heart-beat failed: {}",
                            e
                        )))
                        .await
                    },
                    None => {
                        self.lose_session(DisconnectReason::new("Heart-beat send timed out"))
                            .await
                    },
                }
            },
            Wake::Session(event) => self.handle_session_event(event).await,
        }
    }

    async fn handle_session_event(&mut self, event: Result<SessionEvent>) {
        match event {
            Ok(SessionEvent::Inbound(Inbound::Heartbeat)) => self.touch_peer(),
            Ok(SessionEvent::Inbound(Inbound::Frame(frame))) => {
                self.touch_peer();
                if self.event_handlers.on_receive.is_some() {
                    self.event_handlers.emit_receive(&frame.encode());
                }
                self.handle_frame(frame).await;
            },
            Ok(SessionEvent::Closed(reason)) => self.lose_session(reason).await,
            Err(ChatLinkError::MalformedPayloadError(msg)) => {
                self.touch_peer();
                log::warn!("[chat-link] Dropping undecodable frame: {}", msg);
            },
            Err(e) => {
                self.event_handlers
                    .emit_error(ConnectionError::new(e.to_string(), true));
                self.lose_session(DisconnectReason::new(e.to_string())).await;
            },
        }
    }

    async fn handle_frame(&mut self, frame: Frame) {
        match frame.command {
            Command::Message => {
                self.registry.route(&frame).await;
                for unsub in self.registry.prune() {
                    if self.send(&unsub).await.is_err() {
                        break;
                    }
                }
            },
            Command::Error => {
                // The broker closes the connection after an ERROR frame.
                let summary = stomp::error_summary(&frame);
                log::warn!("[chat-link] Broker error: {}", summary);
                self.event_handlers
                    .emit_error(ConnectionError::new(summary.clone(), true));
                self.lose_session(DisconnectReason::new(format!("Broker error: {}", summary)))
                    .await;
            },
            Command::Receipt => {
                log::debug!("[chat-link] Receipt {:?}", frame.header("receipt-id"));
            },
            other => log::debug!("[chat-link] Ignoring unexpected {} frame", other),
        }
    }

    // ── Commands ────────────────────────────────────────────────────────────

    async fn handle_cmd(&mut self, cmd: Option<ConnCmd>) {
        match cmd {
            Some(ConnCmd::Subscribe {
                topic,
                event_tx,
                result_tx,
            }) => {
                if self.given_up {
                    let _ = result_tx.send(Err(ChatLinkError::TransportError(
                        "Max reconnection attempts reached".to_string(),
                    )));
                    return;
                }
                match self.registry.add(topic, event_tx).await {
                    Ok((handler_id, frame)) => {
                        let _ = result_tx.send(Ok(handler_id));
                        if let Some(frame) = frame {
                            self.send_or_drop(&frame).await;
                        }
                    },
                    Err(e) => {
                        let _ = result_tx.send(Err(e));
                    },
                }
            },
            Some(ConnCmd::Unsubscribe { topic, handler_id }) => {
                if let Some(frame) = self.registry.remove(&topic, handler_id) {
                    self.send_or_drop(&frame).await;
                }
            },
            Some(ConnCmd::Publish { frame, result_tx }) => {
                let result = self.send(&frame).await;
                let failed = result.is_err() && self.session.is_some();
                let _ = result_tx.send(result);
                if failed {
                    self.lose_session(DisconnectReason::new("Send failed")).await;
                }
            },
            Some(ConnCmd::Reconnect) => {
                log::info!("[chat-link] Credentials changed, reconnecting");
                self.given_up = false;
                self.reconnect_now = true;
                if self.session.is_some() {
                    self.lose_session(DisconnectReason::new("Credentials changed"))
                        .await;
                }
            },
            Some(ConnCmd::ListSubscriptions { result_tx }) => {
                let _ = result_tx.send(self.registry.list());
            },
            Some(ConnCmd::Shutdown { done_tx }) => {
                self.shutdown = Some(done_tx);
            },
            None => {
                self.shutdown = Some(None);
            },
        }
    }

    // ── Transport helpers ───────────────────────────────────────────────────

    async fn send(&mut self, frame: &Frame) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Err(ChatLinkError::TransportError("Not connected".to_string()));
        };
        match with_limit(self.timeouts.send_timeout, session.send_frame(frame)).await {
            Some(Ok(())) => {
                if self.event_handlers.on_send.is_some() {
                    self.event_handlers.emit_send(&frame.encode());
                }
                self.touch_heartbeat();
                Ok(())
            },
            Some(Err(e)) => Err(e),
            None => Err(ChatLinkError::TimeoutError(format!(
                "Send of {} timed out after {:?}",
                frame.command, self.timeouts.send_timeout
            ))),
        }
    }

    async fn send_or_drop(&mut self, frame: &Frame) {
        if let Err(e) = self.send(frame).await {
            log::warn!("[chat-link] {} failed: {}", frame.command, e);
            self.lose_session(DisconnectReason::new(e.to_string())).await;
        }
    }

    fn touch_peer(&mut self) {
        self.peer_deadline = TokioInstant::now() + self.dead_after.unwrap_or(FAR_FUTURE);
    }

    fn touch_heartbeat(&mut self) {
        self.next_heartbeat_at =
            TokioInstant::now() + self.heartbeat_every.unwrap_or(FAR_FUTURE);
    }

    /// Drop the current session (if any) and tell everyone.
    async fn lose_session(&mut self, reason: DisconnectReason) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.close().await;
        self.heartbeat_every = None;
        self.dead_after = None;
        log::info!("[chat-link] Session lost: {}", reason);
        self.event_handlers.emit_disconnect(reason.clone());
        self.registry.mark_offline(&reason).await;
        if self.shutdown.is_none() {
            self.set_state(ConnectionState::Reconnecting {
                attempt: self.attempt,
            });
        }
    }

    async fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            let disconnect = stomp::disconnect_frame(DISCONNECT_RECEIPT);
            if session.send_frame(&disconnect).await.is_ok() {
                let wait_receipt = async {
                    loop {
                        match session.next_event().await {
                            Ok(SessionEvent::Inbound(Inbound::Frame(f)))
                                if f.command == Command::Receipt
                                    && f.header("receipt-id") == Some(DISCONNECT_RECEIPT) =>
                            {
                                break
                            },
                            Ok(SessionEvent::Inbound(_)) => continue,
                            Err(ChatLinkError::MalformedPayloadError(_)) => continue,
                            Ok(SessionEvent::Closed(_)) | Err(_) => break,
                        }
                    }
                };
                if with_limit(self.timeouts.disconnect_timeout, wait_receipt)
                    .await
                    .is_none()
                {
                    log::debug!("[chat-link] No DISCONNECT receipt, closing anyway");
                }
            }
            session.close().await;
            self.event_handlers
                .emit_disconnect(DisconnectReason::new("Client disconnected"));
        }

        self.set_state(ConnectionState::Disconnected);
        log::info!("[chat-link] Connection closed");
        if let Some(Some(done_tx)) = self.shutdown.take() {
            let _ = done_tx.send(());
        }
    }
}
