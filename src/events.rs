use std::fmt;

use crate::codec::CodecError;
use crate::frame::Frame;
use crate::subscription::Message;

/// Failures reported to [`EventSink::on_error`].
#[derive(Debug, Clone)]
pub enum ErrorEvent {
    /// The broker sent an ERROR frame. The connection is left open.
    Broker(Frame),
    /// The transport closed (remotely, locally or after a heartbeat
    /// timeout). The connection is now disconnected.
    ConnectionLost(String),
    /// Inbound bytes could not be decoded. The buffered partial frame was
    /// discarded; the connection stays up.
    Malformed(CodecError),
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorEvent::Broker(frame) => {
                let message = frame.get_header(crate::headers::names::MESSAGE).unwrap_or("");
                write!(f, "broker error: {}", message)
            }
            ErrorEvent::ConnectionLost(reason) => write!(f, "connection lost: {}", reason),
            ErrorEvent::Malformed(e) => write!(f, "{}", e),
        }
    }
}

/// Receives connection-level events.
///
/// Supplied to [`Connection::connect`](crate::Connection::connect). Message
/// delivery for a subscription goes to the callback given to `subscribe`;
/// this sink only sees the rest.
pub trait EventSink: Send + Sync + 'static {
    /// The broker accepted the CONNECT.
    fn on_connected(&self, frame: &Frame);

    fn on_error(&self, error: &ErrorEvent) {
        tracing::debug!("unhandled connection error: {}", error);
    }

    fn on_receipt(&self, frame: &Frame) {
        tracing::debug!(
            "RECEIPT {} without handler",
            frame.get_header(crate::headers::names::RECEIPT_ID).unwrap_or("")
        );
    }

    /// A MESSAGE arrived for a subscription id with no registered callback.
    fn on_unhandled_message(&self, message: Message) {
        tracing::warn!(
            "Unhandled received MESSAGE for subscription '{}'",
            message.subscription()
        );
    }
}

type FrameFn = Box<dyn Fn(&Frame) + Send + Sync>;
type ErrorFn = Box<dyn Fn(&ErrorEvent) + Send + Sync>;
type MessageFn = Box<dyn Fn(Message) + Send + Sync>;

/// Closure-based [`EventSink`].
///
/// ```ignore
/// conn.connect(
///     Headers::new().with("host", "/"),
///     Callbacks::new(|frame| println!("connected: {}", frame.command))
///         .on_error(|err| eprintln!("{}", err)),
/// )?;
/// ```
pub struct Callbacks {
    connected: FrameFn,
    error: Option<ErrorFn>,
    receipt: Option<FrameFn>,
    unhandled: Option<MessageFn>,
}

impl Callbacks {
    pub fn new(on_connected: impl Fn(&Frame) + Send + Sync + 'static) -> Self {
        Self {
            connected: Box::new(on_connected),
            error: None,
            receipt: None,
            unhandled: None,
        }
    }

    pub fn on_error(mut self, f: impl Fn(&ErrorEvent) + Send + Sync + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub fn on_receipt(mut self, f: impl Fn(&Frame) + Send + Sync + 'static) -> Self {
        self.receipt = Some(Box::new(f));
        self
    }

    pub fn on_unhandled_message(mut self, f: impl Fn(Message) + Send + Sync + 'static) -> Self {
        self.unhandled = Some(Box::new(f));
        self
    }
}

impl EventSink for Callbacks {
    fn on_connected(&self, frame: &Frame) {
        (self.connected)(frame)
    }

    fn on_error(&self, error: &ErrorEvent) {
        match &self.error {
            Some(f) => f(error),
            None => tracing::debug!("unhandled connection error: {}", error),
        }
    }

    fn on_receipt(&self, frame: &Frame) {
        if let Some(f) = &self.receipt {
            f(frame)
        }
    }

    fn on_unhandled_message(&self, message: Message) {
        match &self.unhandled {
            Some(f) => f(message),
            None => tracing::warn!(
                "Unhandled received MESSAGE for subscription '{}'",
                message.subscription()
            ),
        }
    }
}
