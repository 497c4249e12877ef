use std::fmt;
use std::str::FromStr;

use crate::headers::Headers;

/// STOMP commands understood by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Message,
    Begin,
    Commit,
    Abort,
    Ack,
    Nack,
    Disconnect,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Message => "MESSAGE",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Disconnect => "DISCONNECT",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cmd = match s {
            "CONNECT" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "MESSAGE" => Command::Message,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "DISCONNECT" => Command::Disconnect,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => return Err(format!("unknown STOMP command '{}'", other)),
        };
        Ok(cmd)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Command> for String {
    fn from(cmd: Command) -> Self {
        cmd.as_str().to_string()
    }
}

/// STOMP protocol versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    V1_0,
    V1_1,
    V1_2,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::V1_0 => "1.0",
            Version::V1_1 => "1.1",
            Version::V1_2 => "1.2",
        }
    }

    /// Whether the heart-beat extension exists in this version (1.1+).
    pub fn supports_heartbeat(&self) -> bool {
        *self >= Version::V1_1
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1.0" => Ok(Version::V1_0),
            "1.1" => Ok(Version::V1_1),
            "1.2" => Ok(Version::V1_2),
            other => Err(format!("unsupported STOMP version '{}'", other)),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A simple representation of a STOMP frame.
///
/// `Frame` contains the command (e.g. "SEND", "MESSAGE"), an ordered set
/// of unique headers and the raw body bytes. The command is kept as text so
/// frames carrying verbs this client does not know can still be decoded and
/// reported; use [`Frame::kind`] for the typed view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// STOMP command (e.g. CONNECT, SEND, SUBSCRIBE)
    pub command: String,
    /// Ordered headers with unique names
    pub headers: Headers,
    /// Raw body bytes
    pub body: Vec<u8>,
    skip_content_length: bool,
}

impl Frame {
    /// Create a new frame with the given command and empty headers/body.
    ///
    /// Parameters
    /// - `command`: the STOMP command, either a [`Command`] or any text
    ///   convertible into `String`.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Headers::new(),
            body: Vec::new(),
            skip_content_length: false,
        }
    }

    /// Add or replace a header (builder style).
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(key, value);
        self
    }

    /// Merge a header set into this frame (builder style). Values in
    /// `headers` override values already on the frame.
    pub fn headers(mut self, headers: &Headers) -> Self {
        self.headers.extend_from(headers);
        self
    }

    /// Set the frame body (builder style).
    pub fn set_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Ask the encoder not to emit a `content-length` header for this frame.
    ///
    /// Some brokers treat a frame with `content-length` as a binary message;
    /// text-only consumers can opt out with this. The body then must not
    /// contain NUL bytes.
    pub fn without_content_length(mut self) -> Self {
        self.skip_content_length = true;
        self
    }

    pub fn content_length_suppressed(&self) -> bool {
        self.skip_content_length
    }

    /// Get the value of a header by name.
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Typed command, or `None` when the command text is not a STOMP verb.
    pub fn kind(&self) -> Option<Command> {
        self.command.parse().ok()
    }

    /// Body as UTF-8 text, replacing invalid sequences.
    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Command: {}", self.command)?;
        write!(f, "{}", self.headers)?;
        writeln!(f, "Body ({} bytes)", self.body.len())
    }
}
