#![allow(dead_code)]
//! Shared fixtures for chat-link integration tests.
//!
//! [`MockBroker`] is an in-memory STOMP broker: every `connect` opens a new
//! session whose outgoing frames are recorded and whose inbound side the test
//! drives. [`MockHistory`] serves scripted history pages.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chat_link::stomp::{Command, Frame, Heartbeat, Inbound};
use chat_link::{
    AuthProvider, ChatItem, ChatLinkError, ChatLinkTimeouts, ConnectionManager,
    ConnectionOptions, ConnectionState, Connector, CredentialSlot, DisconnectReason,
    EventHandlers, HistoryFetchError, HistoryLoader, HistoryPage, PageToken, Result,
    SessionEvent, StreamSnapshot, Topic, TopicEvent, TopicRoutes, TopicStream,
    TopicSubscription, TransportSession,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};

pub const WAIT: Duration = Duration::from_secs(5);

/// Poll `cond` until it holds, failing the test after [`WAIT`].
pub async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    let result = tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {}", what);
}

pub async fn within<T>(what: &str, fut: impl Future<Output = T>) -> T {
    match tokio::time::timeout(WAIT, fut).await {
        Ok(value) => value,
        Err(_) => panic!("timed out waiting for {}", what),
    }
}

pub fn item(id: &str, ts: i64) -> ChatItem {
    ChatItem::new(id, ts, format!("message {}", id))
}

pub fn new_body(id: &str, ts: i64) -> String {
    serde_json::json!({
        "command": "new",
        "item": { "id": id, "content": format!("message {}", id), "createdAt": ts }
    })
    .to_string()
}

pub fn delete_body(id: &str) -> String {
    serde_json::json!({ "command": "delete", "id": id }).to_string()
}

pub fn ids(items: &[ChatItem]) -> Vec<String> {
    items.iter().map(|i| i.id.to_string()).collect()
}

/// Options tuned for tests: fast backoff, no heart-beats.
pub fn fast_options() -> ConnectionOptions {
    ConnectionOptions::default()
        .with_reconnect_delay_ms(10)
        .with_max_reconnect_delay_ms(40)
        .with_heartbeat_ms(0, 0)
}

// ── Broker ──────────────────────────────────────────────────────────────────

struct SessionSlot {
    inbound: mpsc::UnboundedSender<SessionEvent>,
    sent: Vec<Frame>,
    heartbeats: usize,
    closed: bool,
}

#[derive(Default)]
struct BrokerState {
    auths: Vec<AuthProvider>,
    sessions: Vec<SessionSlot>,
    refuse: bool,
    reject_auth: bool,
    heartbeat: Heartbeat,
}

/// In-memory broker shared by a test and the connector it hands out.
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(MockConnector {
            state: Arc::clone(&self.state),
        })
    }

    /// Fail every connect with a transport error while set.
    pub fn set_refuse(&self, refuse: bool) {
        self.state.lock().refuse = refuse;
    }

    /// Fail every connect with an authentication error while set.
    pub fn set_reject_auth(&self, reject: bool) {
        self.state.lock().reject_auth = reject;
    }

    /// Heart-beat intervals negotiated by sessions opened from now on.
    pub fn set_heartbeat(&self, outgoing_ms: Option<u64>, incoming_ms: Option<u64>) {
        self.state.lock().heartbeat = Heartbeat {
            outgoing: outgoing_ms.map(Duration::from_millis),
            incoming: incoming_ms.map(Duration::from_millis),
        };
    }

    /// Heart-beat EOLs the client sent on session `index`.
    pub fn heartbeats_sent(&self, index: usize) -> usize {
        self.state
            .lock()
            .sessions
            .get(index)
            .map(|s| s.heartbeats)
            .unwrap_or(0)
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().auths.len()
    }

    /// Bearer tokens presented on every connect attempt, in order.
    pub fn tokens(&self) -> Vec<Option<String>> {
        self.state
            .lock()
            .auths
            .iter()
            .map(|a| a.bearer_token().map(str::to_string))
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    fn latest(&self) -> usize {
        self.session_count().saturating_sub(1)
    }

    /// Frames the client sent on session `index`.
    pub fn sent_on(&self, index: usize) -> Vec<Frame> {
        self.state
            .lock()
            .sessions
            .get(index)
            .map(|s| s.sent.clone())
            .unwrap_or_default()
    }

    /// Frames of `command` sent on any session.
    pub fn sent(&self, command: Command) -> Vec<Frame> {
        self.state
            .lock()
            .sessions
            .iter()
            .flat_map(|s| s.sent.iter().filter(|f| f.command == command).cloned())
            .collect()
    }

    /// Destinations subscribed on session `index`, in send order.
    pub fn subscribed_on(&self, index: usize) -> Vec<String> {
        self.sent_on(index)
            .iter()
            .filter(|f| f.command == Command::Subscribe)
            .filter_map(|f| f.header("destination").map(str::to_string))
            .collect()
    }

    pub fn latest_subscriptions(&self) -> Vec<String> {
        self.subscribed_on(self.latest())
    }

    fn push(&self, event: SessionEvent) {
        let state = self.state.lock();
        if let Some(slot) = state.sessions.last() {
            let _ = slot.inbound.send(event);
        }
    }

    /// Push a `MESSAGE` on the latest session. The `subscription` header is
    /// filled in when that session has subscribed `destination`.
    pub fn publish(&self, destination: &str, body: impl Into<String>) {
        let wire_id = self
            .sent_on(self.latest())
            .iter()
            .rev()
            .find(|f| f.command == Command::Subscribe && f.header("destination") == Some(destination))
            .and_then(|f| f.header("id").map(str::to_string));

        let mut frame = Frame::new(Command::Message).with_header("destination", destination);
        if let Some(id) = wire_id {
            frame = frame.with_header("subscription", id);
        }
        self.push(SessionEvent::Inbound(Inbound::Frame(frame.with_body(body.into()))));
    }

    /// Push a `MESSAGE` carrying only a `destination` header.
    pub fn publish_by_destination(&self, destination: &str, body: impl Into<String>) {
        let frame = Frame::new(Command::Message)
            .with_header("destination", destination)
            .with_body(body.into());
        self.push(SessionEvent::Inbound(Inbound::Frame(frame)));
    }

    /// Push a bare EOL on the latest session.
    pub fn send_heartbeat(&self) {
        self.push(SessionEvent::Inbound(Inbound::Heartbeat));
    }

    pub fn send_error(&self, message: &str) {
        let frame = Frame::new(Command::Error).with_header("message", message);
        self.push(SessionEvent::Inbound(Inbound::Frame(frame)));
    }

    /// Close the latest session from the broker side.
    pub fn drop_session(&self) {
        self.push(SessionEvent::Closed(DisconnectReason::with_code(
            "Broker went away",
            1006,
        )));
    }

    pub fn is_closed(&self, index: usize) -> bool {
        self.state
            .lock()
            .sessions
            .get(index)
            .map(|s| s.closed)
            .unwrap_or(true)
    }
}

struct MockConnector {
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, auth: &AuthProvider) -> Result<Box<dyn TransportSession>> {
        let mut state = self.state.lock();
        state.auths.push(auth.clone());
        if state.refuse {
            return Err(ChatLinkError::TransportError("Connection refused".into()));
        }
        if state.reject_auth {
            return Err(ChatLinkError::AuthenticationError("Bad credentials".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.sessions.push(SessionSlot {
            inbound: tx.clone(),
            sent: Vec::new(),
            heartbeats: 0,
            closed: false,
        });
        Ok(Box::new(MockSession {
            index: state.sessions.len() - 1,
            heartbeat: state.heartbeat,
            state: Arc::clone(&self.state),
            inbound: rx,
            loopback: tx,
        }))
    }
}

struct MockSession {
    index: usize,
    heartbeat: Heartbeat,
    state: Arc<Mutex<BrokerState>>,
    inbound: mpsc::UnboundedReceiver<SessionEvent>,
    loopback: mpsc::UnboundedSender<SessionEvent>,
}

#[async_trait]
impl TransportSession for MockSession {
    fn heartbeat(&self) -> Heartbeat {
        self.heartbeat
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        {
            let mut state = self.state.lock();
            let slot = &mut state.sessions[self.index];
            if slot.closed {
                return Err(ChatLinkError::TransportError("Session closed".into()));
            }
            slot.sent.push(frame.clone());
        }
        if frame.command == Command::Disconnect {
            if let Some(receipt) = frame.header("receipt") {
                let reply = Frame::new(Command::Receipt).with_header("receipt-id", receipt);
                let _ = self
                    .loopback
                    .send(SessionEvent::Inbound(Inbound::Frame(reply)));
            }
        }
        Ok(())
    }

    async fn send_heartbeat(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        let slot = &mut state.sessions[self.index];
        if slot.closed {
            return Err(ChatLinkError::TransportError("Session closed".into()));
        }
        slot.heartbeats += 1;
        Ok(())
    }

    async fn next_event(&mut self) -> Result<SessionEvent> {
        match self.inbound.recv().await {
            Some(event) => Ok(event),
            None => Ok(SessionEvent::Closed(DisconnectReason::new("Channel closed"))),
        }
    }

    async fn close(&mut self) {
        self.state.lock().sessions[self.index].closed = true;
        self.inbound.close();
    }
}

// ── History ─────────────────────────────────────────────────────────────────

/// Scripted [`HistoryLoader`].
///
/// Queued failures are returned first, one per call; after that each token
/// is answered from the page table, or `NotFound` when absent.
pub struct MockHistory {
    pages: Mutex<HashMap<PageToken, HistoryPage>>,
    failures: Mutex<VecDeque<HistoryFetchError>>,
    calls: Mutex<Vec<(Topic, PageToken)>>,
    gated: AtomicBool,
    gate: Semaphore,
}

impl MockHistory {
    fn build(gated: bool) -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(HashMap::new()),
            failures: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            gated: AtomicBool::new(gated),
            gate: Semaphore::new(0),
        })
    }

    pub fn new() -> Arc<Self> {
        Self::build(false)
    }

    /// Hold every response until [`release`](Self::release) is called.
    pub fn gated() -> Arc<Self> {
        Self::build(true)
    }

    pub fn set_page(&self, token: PageToken, page: HistoryPage) {
        self.pages.lock().insert(token, page);
    }

    pub fn fail_next(&self, err: HistoryFetchError) {
        self.failures.lock().push_back(err);
    }

    /// Let `n` held responses through.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn calls(&self) -> Vec<(Topic, PageToken)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl HistoryLoader for MockHistory {
    async fn load_page(
        &self,
        topic: &Topic,
        page: &PageToken,
    ) -> std::result::Result<HistoryPage, HistoryFetchError> {
        self.calls.lock().push((topic.clone(), page.clone()));
        if self.gated.load(Ordering::SeqCst) {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        self.pages
            .lock()
            .get(page)
            .cloned()
            .ok_or_else(|| HistoryFetchError::NotFound(format!("{} {}", topic, page)))
    }
}

// ── Setup helpers ───────────────────────────────────────────────────────────

pub async fn connect(
    broker: &MockBroker,
    credentials: CredentialSlot,
    options: ConnectionOptions,
    handlers: EventHandlers,
) -> Arc<ConnectionManager> {
    Arc::new(
        ConnectionManager::connect(
            broker.connector(),
            credentials,
            options,
            ChatLinkTimeouts::fast(),
            handlers,
            TopicRoutes::default(),
        )
        .await,
    )
}

pub async fn connect_default(broker: &MockBroker) -> Arc<ConnectionManager> {
    connect(
        broker,
        CredentialSlot::new(AuthProvider::jwt_token("token-1".into())),
        fast_options(),
        EventHandlers::default(),
    )
    .await
}

pub async fn wait_state(manager: &ConnectionManager, wanted: ConnectionState) {
    let mut rx = manager.state_changes();
    let result = within("connection state", rx.wait_for(|s| *s == wanted)).await;
    assert!(result.is_ok(), "state channel closed before {:?}", wanted);
}

/// Next envelope-bearing event, skipping `Live` and `Interrupted`.
pub async fn next_envelope(sub: &mut TopicSubscription) -> chat_link::LiveEnvelope {
    within("topic envelope", async {
        loop {
            match sub.next().await {
                Some(TopicEvent::Envelope(envelope)) => return envelope,
                Some(TopicEvent::Live) | Some(TopicEvent::Interrupted(_)) => continue,
                Some(TopicEvent::Failed(e)) => panic!("topic failed: {}", e),
                None => panic!("subscription ended"),
            }
        }
    })
    .await
}

/// Wait until the stream publishes a snapshot satisfying `pred`.
pub async fn wait_snapshot(
    stream: &mut TopicStream,
    what: &str,
    pred: impl Fn(&StreamSnapshot) -> bool,
) -> StreamSnapshot {
    let current = stream.snapshot();
    if pred(&current) {
        return current;
    }
    within(what, async {
        loop {
            match stream.changed().await {
                Some(snapshot) if pred(&snapshot) => return snapshot,
                Some(_) => continue,
                None => panic!("stream ended while waiting for {}", what),
            }
        }
    })
    .await
}
