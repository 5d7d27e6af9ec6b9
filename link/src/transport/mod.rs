//! Broker transport seam.
//!
//! The connection task only ever talks to the broker through a
//! [`TransportSession`] produced by a [`Connector`]. A session is one STOMP
//! session: the connector has already exchanged `CONNECT`/`CONNECTED` when
//! it hands the session out.
//!
//! - [`websocket`]: STOMP over `tokio-tungstenite`

pub mod websocket;

pub use websocket::StompWsConnector;

use async_trait::async_trait;

use crate::auth::AuthProvider;
use crate::error::Result;
use crate::event_handlers::DisconnectReason;
use crate::stomp::{Frame, Heartbeat, Inbound};

/// What a session yields when read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Inbound(Inbound),
    /// The peer closed the session.
    Closed(DisconnectReason),
}

/// Opens broker sessions.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Dial the broker and complete the STOMP handshake with `auth`.
    ///
    /// Errors are classified: `AuthenticationError` for rejected
    /// credentials, `TimeoutError` for a slow broker, `TransportError` for
    /// everything else.
    async fn connect(&self, auth: &AuthProvider) -> Result<Box<dyn TransportSession>>;
}

/// One live STOMP session.
#[async_trait]
pub trait TransportSession: Send {
    /// Heart-beat intervals agreed during the handshake.
    fn heartbeat(&self) -> Heartbeat;

    async fn send_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Send a heart-beat EOL.
    async fn send_heartbeat(&mut self) -> Result<()>;

    /// Wait for the next event. Must be cancel-safe: it is polled inside
    /// `select!` and dropping the future must not lose data.
    ///
    /// `MalformedPayloadError` is recoverable, the session stays usable.
    /// Any other error means the session is gone.
    async fn next_event(&mut self) -> Result<SessionEvent>;

    /// Close the underlying socket. Idempotent.
    async fn close(&mut self);
}
