//! STOMP over WebSocket.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::time::Instant as TokioInstant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{Connector, SessionEvent, TransportSession};
use crate::auth::AuthProvider;
use crate::error::{ChatLinkError, Result};
use crate::event_handlers::DisconnectReason;
use crate::models::ConnectionOptions;
use crate::stomp::{self, Command, Frame, Heartbeat, Inbound};
use crate::timeouts::{with_limit, ChatLinkTimeouts};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Maximum text message size (16 MiB).
const MAX_WS_MESSAGE_BYTES: usize = 16 << 20;

/// Map `http(s)://host` plus `ws_path` to `ws(s)://host/ws_path`.
///
/// Returns the WebSocket URL and the host used for the STOMP `host` header.
pub(crate) fn resolve_ws_url(base_url: &str, ws_path: &str) -> Result<(String, String)> {
    let base = Url::parse(base_url.trim()).map_err(|e| {
        ChatLinkError::ConfigurationError(format!("Invalid base_url '{}': {}", base_url, e))
    })?;

    let ws_scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ChatLinkError::ConfigurationError(format!(
                "Unsupported base_url scheme '{}'; expected http(s) or ws(s)",
                other
            )));
        },
    };

    let host = base
        .host_str()
        .ok_or_else(|| {
            ChatLinkError::ConfigurationError(format!("base_url '{}' has no host", base_url))
        })?
        .to_string();

    let mut ws_url = base.clone();
    ws_url.set_scheme(ws_scheme).map_err(|_| {
        ChatLinkError::ConfigurationError("Failed to set WebSocket URL scheme".to_string())
    })?;
    ws_url.set_fragment(None);
    ws_url.set_query(None);
    ws_url.set_path(ws_path);

    Ok((ws_url.to_string(), host))
}

fn apply_ws_auth_headers(request: &mut Request<()>, auth: &AuthProvider) -> Result<()> {
    let value = match auth {
        AuthProvider::JwtToken(token) => format!("Bearer {}", token),
        AuthProvider::BasicAuth(_, _) | AuthProvider::None => return Ok(()),
    };
    let header_value = HeaderValue::from_str(&value).map_err(|e| {
        ChatLinkError::ConfigurationError(format!(
            "Invalid token for Authorization header: {}",
            e
        ))
    })?;
    request.headers_mut().insert(AUTHORIZATION, header_value);
    Ok(())
}

/// [`Connector`] dialling a STOMP broker over WebSocket.
#[derive(Debug, Clone)]
pub struct StompWsConnector {
    ws_url: String,
    host: String,
    heartbeat_ms: (u64, u64),
    connection_timeout: Duration,
    connect_ack_timeout: Duration,
}

impl StompWsConnector {
    pub fn new(
        base_url: &str,
        options: &ConnectionOptions,
        timeouts: &ChatLinkTimeouts,
    ) -> Result<Self> {
        let (ws_url, url_host) = resolve_ws_url(base_url, &options.ws_path)?;
        Ok(Self {
            ws_url,
            host: options.virtual_host.clone().unwrap_or(url_host),
            heartbeat_ms: (options.heartbeat_outgoing_ms, options.heartbeat_incoming_ms),
            connection_timeout: timeouts.connection_timeout,
            connect_ack_timeout: timeouts.connect_ack_timeout,
        })
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    async fn dial(&self, auth: &AuthProvider) -> Result<WsStream> {
        let mut request = self.ws_url.as_str().into_client_request().map_err(|e| {
            ChatLinkError::ConfigurationError(format!("Failed to build WebSocket request: {}", e))
        })?;
        apply_ws_auth_headers(&mut request, auth)?;

        let connect_result =
            with_limit(self.connection_timeout, tokio_tungstenite::connect_async(request)).await;

        match connect_result {
            Some(Ok((stream, _))) => Ok(stream),
            Some(Err(tokio_tungstenite::tungstenite::error::Error::Http(response))) => {
                let status = response.status();
                match status.as_u16() {
                    401 | 403 => Err(ChatLinkError::AuthenticationError(format!(
                        "WebSocket upgrade rejected: {}",
                        status
                    ))),
                    code => Err(ChatLinkError::TransportError(format!(
                        "WebSocket HTTP error: {}",
                        code
                    ))),
                }
            },
            Some(Err(e)) => Err(ChatLinkError::TransportError(format!(
                "Connection failed: {}",
                e
            ))),
            None => Err(ChatLinkError::TimeoutError(format!(
                "Connection timeout ({:?})",
                self.connection_timeout
            ))),
        }
    }
}

/// Send CONNECT and wait for CONNECTED, tolerating heart-beats and pings.
async fn stomp_handshake(
    ws: &mut WsStream,
    connect: Frame,
    heartbeat_ms: (u64, u64),
    ack_timeout: Duration,
) -> Result<Heartbeat> {
    ws.send(Message::Text(connect.encode().into()))
        .await
        .map_err(|e| ChatLinkError::TransportError(format!("Failed to send CONNECT: {}", e)))?;

    let timeout_err =
        || ChatLinkError::TimeoutError(format!("No CONNECTED within {:?}", ack_timeout));
    let deadline = TokioInstant::now() + ack_timeout;
    loop {
        let remaining = deadline.saturating_duration_since(TokioInstant::now());
        if remaining.is_zero() {
            return Err(timeout_err());
        }

        let data = match tokio::time::timeout(remaining, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => text.as_bytes().to_vec(),
            Ok(Some(Ok(Message::Binary(data)))) => data.to_vec(),
            Ok(Some(Ok(Message::Ping(payload)))) => {
                let _ = ws.send(Message::Pong(payload)).await;
                continue;
            },
            Ok(Some(Ok(Message::Pong(_) | Message::Frame(_)))) => continue,
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                return Err(ChatLinkError::TransportError(
                    "Connection closed during STOMP handshake".to_string(),
                ));
            },
            Ok(Some(Err(e))) => {
                return Err(ChatLinkError::TransportError(format!(
                    "WebSocket error during STOMP handshake: {}",
                    e
                )));
            },
            Err(_) => return Err(timeout_err()),
        };

        for inbound in Frame::decode_all(&data)? {
            let Inbound::Frame(frame) = inbound else {
                continue;
            };
            match frame.command {
                Command::Connected => {
                    return Ok(Heartbeat::negotiate(
                        heartbeat_ms.0,
                        heartbeat_ms.1,
                        frame.header("heart-beat"),
                    ));
                },
                Command::Error => {
                    return Err(ChatLinkError::AuthenticationError(stomp::error_summary(
                        &frame,
                    )));
                },
                other => {
                    log::debug!("[chat-link] Ignoring {} before CONNECTED", other);
                },
            }
        }
    }
}

#[async_trait]
impl Connector for StompWsConnector {
    async fn connect(&self, auth: &AuthProvider) -> Result<Box<dyn TransportSession>> {
        log::debug!("[chat-link] Dialling {}", self.ws_url);
        let mut ws = self.dial(auth).await?;

        let connect = stomp::connect_frame(&self.host, auth, self.heartbeat_ms);
        let heartbeat =
            match stomp_handshake(&mut ws, connect, self.heartbeat_ms, self.connect_ack_timeout)
                .await
            {
                Ok(hb) => hb,
                Err(e) => {
                    let _ = ws.close(None).await;
                    return Err(e);
                },
            };

        log::info!(
            "[chat-link] STOMP session established (heart-beat out={:?} in={:?})",
            heartbeat.outgoing,
            heartbeat.incoming
        );
        Ok(Box::new(WsSession {
            ws,
            heartbeat,
            pending: VecDeque::new(),
            closed: false,
        }))
    }
}

struct WsSession {
    ws: WsStream,
    heartbeat: Heartbeat,
    /// Frames decoded from a message that carried more than one.
    pending: VecDeque<Inbound>,
    closed: bool,
}

impl WsSession {
    fn enqueue(&mut self, data: &[u8]) -> Result<()> {
        queue_frames(&mut self.pending, data)
    }
}

/// Decode one WebSocket message into `pending`. Good frames are kept; the
/// first bad one is reported after them.
fn queue_frames(pending: &mut VecDeque<Inbound>, data: &[u8]) -> Result<()> {
    if data.len() > MAX_WS_MESSAGE_BYTES {
        return Err(ChatLinkError::MalformedPayloadError(format!(
            "Message too large ({} bytes)",
            data.len()
        )));
    }
    let decoded = Frame::decode_each(data);
    if decoded.is_empty() {
        pending.push_back(Inbound::Heartbeat);
    }

    let mut first_err = None;
    for result in decoded {
        match result {
            Ok(inbound) => pending.push_back(inbound),
            Err(e) => {
                log::debug!("[chat-link] Skipping bad frame in batch: {}", e);
                first_err.get_or_insert(e);
            },
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[async_trait]
impl TransportSession for WsSession {
    fn heartbeat(&self) -> Heartbeat {
        self.heartbeat
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        self.ws
            .send(Message::Text(frame.encode().into()))
            .await
            .map_err(|e| ChatLinkError::TransportError(format!("Failed to send {}: {}", frame.command, e)))
    }

    async fn send_heartbeat(&mut self) -> Result<()> {
        self.ws
            .send(Message::Text("\n".into()))
            .await
            .map_err(|e| ChatLinkError::TransportError(format!("Failed to send heart-beat: {}", e)))
    }

    async fn next_event(&mut self) -> Result<SessionEvent> {
        loop {
            if let Some(inbound) = self.pending.pop_front() {
                return Ok(SessionEvent::Inbound(inbound));
            }

            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => self.enqueue(text.as_bytes())?,
                Some(Ok(Message::Binary(data))) => self.enqueue(&data)?,
                Some(Ok(Message::Ping(payload))) => {
                    let _ = self.ws.send(Message::Pong(payload)).await;
                    return Ok(SessionEvent::Inbound(Inbound::Heartbeat));
                },
                Some(Ok(Message::Pong(_))) => {
                    return Ok(SessionEvent::Inbound(Inbound::Heartbeat));
                },
                Some(Ok(Message::Frame(_))) => {},
                Some(Ok(Message::Close(frame))) => {
                    self.closed = true;
                    let reason = match frame {
                        Some(f) => DisconnectReason::with_code(f.reason.to_string(), f.code.into()),
                        None => DisconnectReason::new("Server closed connection"),
                    };
                    return Ok(SessionEvent::Closed(reason));
                },
                Some(Err(e)) => {
                    self.closed = true;
                    return Err(ChatLinkError::TransportError(format!("WebSocket error: {}", e)));
                },
                None => {
                    self.closed = true;
                    return Ok(SessionEvent::Closed(DisconnectReason::new(
                        "WebSocket stream ended",
                    )));
                },
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.ws.close(None).await;
    }
}
