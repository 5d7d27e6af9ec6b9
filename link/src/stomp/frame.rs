//! STOMP 1.2 frame model and text codec.

use std::fmt;
use std::str::FromStr;

use crate::error::{ChatLinkError, Result};

/// STOMP command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // client frames
    Connect,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    // server frames
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Connected => "CONNECTED",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// CONNECT and CONNECTED headers are never escaped.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = ChatLinkError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "CONNECT" => Self::Connect,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "DISCONNECT" => Self::Disconnect,
            "CONNECTED" => Self::Connected,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => {
                return Err(ChatLinkError::MalformedPayloadError(format!(
                    "Unknown STOMP command '{}'",
                    other
                )))
            },
        })
    }
}

/// One STOMP frame.
///
/// Header order is preserved; when a header repeats, the first occurrence
/// wins, as STOMP 1.2 requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Unit read off the wire: a frame or a bare heart-beat EOL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Frame(Frame),
    Heartbeat,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Serialize to wire text, NUL-terminated. A `content-length` header is
    /// added for non-empty bodies unless one is already present.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');

        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }

        if !self.body.is_empty() && self.header("content-length").is_none() {
            out.push_str("content-length:");
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }

        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse every frame and heart-beat contained in `input`.
    ///
    /// A WebSocket message normally carries a single frame, but brokers are
    /// allowed to batch several and to interleave heart-beat EOLs.
    pub fn decode_all(input: &[u8]) -> Result<Vec<Inbound>> {
        Self::decode_each(input).into_iter().collect()
    }

    /// Like [`decode_all`](Self::decode_all), but a bad frame only costs
    /// itself: decoding resumes after its NUL terminator, so the frames
    /// around it are still returned.
    pub fn decode_each(input: &[u8]) -> Vec<Result<Inbound>> {
        let mut out = Vec::new();
        let mut pos = 0;

        while pos < input.len() {
            // EOLs between frames are heart-beats.
            let mut saw_eol = false;
            while pos < input.len() && (input[pos] == b'\n' || input[pos] == b'\r') {
                saw_eol = true;
                pos += 1;
            }
            if saw_eol {
                out.push(Ok(Inbound::Heartbeat));
            }
            if pos >= input.len() {
                break;
            }

            match decode_one(&input[pos..]) {
                Ok((frame, consumed)) => {
                    out.push(Ok(Inbound::Frame(frame)));
                    pos += consumed;
                },
                Err(e) => {
                    out.push(Err(e));
                    pos = match input[pos..].iter().position(|b| *b == 0) {
                        Some(nul) => pos + nul + 1,
                        None => input.len(),
                    };
                },
            }
        }

        out
    }

    /// Parse exactly one frame; trailing heart-beats are ignored.
    pub fn decode(input: &[u8]) -> Result<Frame> {
        Self::decode_all(input)?
            .into_iter()
            .find_map(|inbound| match inbound {
                Inbound::Frame(frame) => Some(frame),
                Inbound::Heartbeat => None,
            })
            .ok_or_else(|| ChatLinkError::MalformedPayloadError("No STOMP frame in input".into()))
    }
}

fn malformed(msg: impl Into<String>) -> ChatLinkError {
    ChatLinkError::MalformedPayloadError(msg.into())
}

fn read_line(input: &[u8], pos: &mut usize) -> Result<String> {
    let start = *pos;
    let rel_end = input[start..]
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| malformed("Truncated STOMP frame: missing EOL"))?;
    let mut end = start + rel_end;
    *pos = end + 1;
    if end > start && input[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8(input[start..end].to_vec())
        .map_err(|_| malformed("STOMP frame line is not UTF-8"))
}

fn decode_one(input: &[u8]) -> Result<(Frame, usize)> {
    let mut pos = 0;
    let command: Command = read_line(input, &mut pos)?.parse()?;
    let unescape = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let line = read_line(input, &mut pos)?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| malformed(format!("Invalid STOMP header line '{}'", line)))?;
        if unescape {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .map(|(_, v)| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| malformed(format!("Invalid content-length '{}'", v)))
        })
        .transpose()?;

    let body_end = match content_length {
        Some(len) => pos
            .checked_add(len)
            .filter(|&end| end < input.len() && input[end] == 0)
            .ok_or_else(|| malformed("STOMP body shorter than content-length"))?,
        None => {
            pos + input[pos..]
                .iter()
                .position(|b| *b == 0)
                .ok_or_else(|| malformed("Truncated STOMP frame: missing NUL"))?
        },
    };

    let body = String::from_utf8(input[pos..body_end].to_vec())
        .map_err(|_| malformed("STOMP body is not UTF-8"))?;

    Ok((
        Frame {
            command,
            headers,
            body,
        },
        body_end + 1,
    ))
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(malformed(format!(
                    "Undefined STOMP header escape '\\{}'",
                    other.map(String::from).unwrap_or_default()
                )))
            },
        }
    }
    Ok(out)
}
