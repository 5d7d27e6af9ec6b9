//! STOMP 1.2 wire protocol.
//!
//! [`Frame`] is the codec; the helpers here build the handful of client
//! frames the connection task sends and negotiate heart-beats from the
//! broker's `CONNECTED` frame.

mod frame;

pub use frame::{Command, Frame, Inbound};

use std::time::Duration;

use crate::auth::AuthProvider;

pub const ACCEPT_VERSION: &str = "1.2";

/// Heart-beat intervals agreed with the broker. `None` means disabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Heartbeat {
    /// How often the client must send something.
    pub outgoing: Option<Duration>,
    /// How often the broker promised to send something.
    pub incoming: Option<Duration>,
}

impl Heartbeat {
    /// Negotiate from the client offer `(cx, cy)` and the broker's
    /// `heart-beat: sx,sy` header.
    pub fn negotiate(client_out_ms: u64, client_in_ms: u64, server_header: Option<&str>) -> Self {
        let (sx, sy) = server_header
            .and_then(|raw| {
                let (a, b) = raw.split_once(',')?;
                Some((a.trim().parse::<u64>().ok()?, b.trim().parse::<u64>().ok()?))
            })
            .unwrap_or((0, 0));

        let pick = |ours: u64, theirs: u64| {
            if ours == 0 || theirs == 0 {
                None
            } else {
                Some(Duration::from_millis(ours.max(theirs)))
            }
        };

        Self {
            outgoing: pick(client_out_ms, sy),
            incoming: pick(client_in_ms, sx),
        }
    }

    /// Silence longer than this means the connection is dead.
    pub fn dead_after(&self) -> Option<Duration> {
        self.incoming.map(|d| d * 2)
    }
}

/// CONNECT frame for `host`, carrying the credential and heart-beat offer.
pub fn connect_frame(host: &str, auth: &AuthProvider, heartbeat_ms: (u64, u64)) -> Frame {
    let mut frame = Frame::new(Command::Connect)
        .with_header("accept-version", ACCEPT_VERSION)
        .with_header("host", host)
        .with_header("heart-beat", format!("{},{}", heartbeat_ms.0, heartbeat_ms.1));

    match auth {
        AuthProvider::BasicAuth(login, passcode) => {
            frame = frame
                .with_header("login", login.as_str())
                .with_header("passcode", passcode.as_str());
        },
        AuthProvider::JwtToken(token) => {
            frame = frame.with_header("Authorization", format!("Bearer {}", token));
        },
        AuthProvider::None => {},
    }
    frame
}

pub fn subscribe_frame(wire_id: &str, destination: &str) -> Frame {
    Frame::new(Command::Subscribe)
        .with_header("id", wire_id)
        .with_header("destination", destination)
        .with_header("ack", "auto")
}

pub fn unsubscribe_frame(wire_id: &str) -> Frame {
    Frame::new(Command::Unsubscribe).with_header("id", wire_id)
}

pub fn send_frame(destination: &str, json_body: String) -> Frame {
    Frame::new(Command::Send)
        .with_header("destination", destination)
        .with_header("content-type", "application/json")
        .with_body(json_body)
}

pub fn disconnect_frame(receipt: &str) -> Frame {
    Frame::new(Command::Disconnect).with_header("receipt", receipt)
}

/// Short description of an ERROR frame for logs and error events.
pub fn error_summary(frame: &Frame) -> String {
    let message = frame.header("message").unwrap_or("broker error");
    if frame.body.is_empty() {
        message.to_string()
    } else {
        format!("{}: {}", message, frame.body.trim())
    }
}
