use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;

use crate::codec::{CodecError, Escaping, StompCodec};
use crate::config::Config;
use crate::events::{ErrorEvent, EventSink};
use crate::frame::{Command, Frame, Version};
use crate::headers::{Headers, names};
use crate::heartbeat::{HeartbeatMonitor, liveness_expired, negotiate_heartbeats, parse_heartbeat_header};
use crate::scheduler::{Scheduler, Task};
use crate::subscription::{Message, MessageHandler, Subscription, SubscriptionRegistry};
use crate::transaction::{Transaction, TransactionRegistry};
use crate::transport::Transport;

/// Errors returned by `Connection` operations.
#[derive(Error, Debug)]
pub enum ConnError {
    /// I/O-level error from the transport
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Protocol-level misuse (e.g. connecting twice)
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Frame decoding error
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The connection is not connecting or connected
    #[error("not connected")]
    NotConnected,
}

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disconnected,
    /// CONNECT requested (or sent); waiting for CONNECTED.
    Connecting,
    Connected,
}

/// Mutable per-connection record. Only touched with the session lock held,
/// and the lock is never held across user callbacks or transport calls.
struct Session {
    state: State,
    version: Option<Version>,
    codec: StompCodec,
    partial: Vec<u8>,
    transport_open: bool,
    close_handler_attached: bool,
    pending_connect: Option<Headers>,
    close_reason: Option<String>,
    sink: Option<Arc<dyn EventSink>>,
    heartbeat: HeartbeatMonitor,
    subscriptions: SubscriptionRegistry,
    transactions: TransactionRegistry,
    counter: u64,
}

impl Session {
    fn new() -> Self {
        Self {
            state: State::Disconnected,
            version: None,
            codec: StompCodec::new(),
            partial: Vec::new(),
            transport_open: false,
            close_handler_attached: false,
            pending_connect: None,
            close_reason: None,
            sink: None,
            heartbeat: HeartbeatMonitor::new(),
            subscriptions: SubscriptionRegistry::default(),
            transactions: TransactionRegistry::default(),
            counter: 0,
        }
    }

    fn ensure_active(&self) -> Result<(), ConnError> {
        match self.state {
            State::Disconnected => Err(ConnError::NotConnected),
            State::Connecting | State::Connected => Ok(()),
        }
    }

    fn teardown(&mut self, scheduler: &dyn Scheduler) {
        self.heartbeat.stop(scheduler);
        self.state = State::Disconnected;
        self.version = None;
        self.codec = StompCodec::new();
        self.partial.clear();
        self.pending_connect = None;
        self.subscriptions.clear();
        self.transactions.clear();
        // the sink may hold a Connection clone
        self.sink = None;
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn Scheduler>,
    config: Config,
    session: Mutex<Session>,
    /// Serialises writers so the chunks of one frame are never interleaved
    /// with another frame or a heartbeat. Taken before `session` when both
    /// are needed.
    send_lock: Mutex<()>,
}

/// A STOMP session over an injected transport.
///
/// `Connection` drives the CONNECT handshake, reassembles inbound frames,
/// runs heartbeats through the injected [`Scheduler`] and dispatches frames
/// to subscription callbacks and the [`EventSink`]. It is a cheap clonable
/// handle; all clones share the same session.
///
/// The transport binding feeds events in through [`handle_open`],
/// [`handle_message`] and [`handle_close`]; see [`crate::transport::tcp`]
/// for a ready-made TCP binding.
///
/// [`handle_open`]: Connection::handle_open
/// [`handle_message`]: Connection::handle_message
/// [`handle_close`]: Connection::handle_close
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Build a connection over `transport`, scheduling heartbeats on
    /// `scheduler`. No bytes are sent until [`Connection::connect`].
    pub fn new(
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
        config: Config,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                scheduler,
                config,
                session: Mutex::new(Session::new()),
                send_lock: Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn state(&self) -> State {
        self.inner.session.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == State::Connected
    }

    /// Protocol version from the broker's CONNECTED frame.
    pub fn version(&self) -> Option<Version> {
        self.inner.session.lock().version
    }

    /// Ids of the subscriptions with a registered callback, sorted.
    pub fn subscription_ids(&self) -> Vec<String> {
        self.inner.session.lock().subscriptions.ids()
    }

    /// Transaction ids begun and not yet committed or aborted.
    pub fn open_transactions(&self) -> Vec<String> {
        self.inner.session.lock().transactions.open()
    }

    /// True while heartbeat timers are scheduled.
    pub fn heartbeat_active(&self) -> bool {
        self.inner.session.lock().heartbeat.is_running()
    }

    // =========================================================================
    // Handshake and lifecycle
    // =========================================================================

    /// Start the STOMP handshake.
    ///
    /// Parameters
    /// - `headers`: CONNECT headers (`host`, `login`, `passcode`, ...).
    ///   `accept-version` and `heart-beat` are filled in from the config.
    /// - `sink`: receives `on_connected` once CONNECTED arrives, and later
    ///   errors and receipts.
    ///
    /// If the transport is already open the CONNECT frame is sent now;
    /// otherwise it is sent from [`Connection::handle_open`].
    pub fn connect(&self, headers: Headers, sink: impl EventSink) -> Result<(), ConnError> {
        let send_now = {
            let mut s = self.inner.session.lock();
            if s.state != State::Disconnected {
                return Err(ConnError::Protocol(
                    "connect called on an active connection".into(),
                ));
            }
            s.state = State::Connecting;
            s.sink = Some(Arc::new(sink));
            s.close_handler_attached = true;
            s.close_reason = None;
            s.partial.clear();
            if s.transport_open {
                true
            } else {
                tracing::debug!("waiting for transport to open before CONNECT");
                s.pending_connect = Some(headers.clone());
                false
            }
        };
        if send_now {
            self.send_connect(headers)?;
        }
        Ok(())
    }

    fn send_connect(&self, mut headers: Headers) -> Result<(), ConnError> {
        let config = &self.inner.config;
        headers.set(names::ACCEPT_VERSION, config.accept_version_header());
        headers.set(names::HEART_BEAT, config.heartbeat.header_value());
        self.transmit(&Frame::new(Command::Connect).headers(&headers))
    }

    /// Send DISCONNECT and tear the session down.
    ///
    /// The close handler is detached first, so the resulting transport close
    /// does not reach `on_error`. Timers are cancelled and subscriptions
    /// dropped even when sending DISCONNECT fails; that failure is returned.
    pub fn disconnect(&self, headers: Headers) -> Result<(), ConnError> {
        self.inner.session.lock().ensure_active()?;
        let frame = Frame::new(Command::Disconnect).headers(&headers);
        let out = self.encode(&frame);
        let sent = {
            // held until teardown so no heartbeat can follow DISCONNECT
            let _guard = self.inner.send_lock.lock();
            let sent = self.write(out);
            let mut s = self.inner.session.lock();
            s.close_handler_attached = false;
            s.transport_open = false;
            s.teardown(self.inner.scheduler.as_ref());
            sent
        };
        self.inner.transport.close();
        tracing::debug!("disconnected");
        sent
    }

    /// [`Connection::disconnect`], then run `on_disconnected`.
    pub fn disconnect_with(
        &self,
        headers: Headers,
        on_disconnected: impl FnOnce(),
    ) -> Result<(), ConnError> {
        let result = self.disconnect(headers);
        on_disconnected();
        result
    }

    // =========================================================================
    // Transport events
    // =========================================================================

    /// Transport "open" event. Sends a CONNECT that was waiting for it.
    pub fn handle_open(&self) {
        let pending = {
            let mut s = self.inner.session.lock();
            s.transport_open = true;
            s.pending_connect.take()
        };
        tracing::debug!("transport opened");
        if let Some(headers) = pending {
            if let Err(e) = self.send_connect(headers) {
                tracing::warn!("failed to send CONNECT: {}", e);
            }
        }
    }

    /// Transport "message" event.
    ///
    /// Any message counts as server activity. The bytes are appended to the
    /// pending partial frame, complete frames are decoded and dispatched in
    /// wire order, and the incomplete tail is kept for the next message.
    /// A segment that fails to decode is dropped and reported as
    /// `ErrorEvent::Malformed` once the good frames have been dispatched.
    pub fn handle_message(&self, data: &[u8]) {
        let config = &self.inner.config;
        let decoded = {
            let mut s = self.inner.session.lock();
            s.heartbeat.record_activity(self.inner.scheduler.now());

            if data == b"\n" && s.partial.is_empty() {
                None
            } else {
                let mut buffer = std::mem::take(&mut s.partial);
                buffer.extend_from_slice(data);
                let out = s.codec.unmarshal(&buffer);
                s.partial = out.partial;
                Some((out.frames, out.errors))
            }
        };

        let Some((frames, errors)) = decoded else {
            config.debug(|| "<<< PONG".to_string());
            tracing::trace!("<<< PONG");
            return;
        };
        config.debug(|| format!("<<< {}", String::from_utf8_lossy(data)));
        tracing::trace!("<<< {} bytes", data.len());

        for frame in frames {
            self.dispatch(frame);
        }
        for e in errors {
            tracing::warn!("discarding undecodable frame: {}", e);
            if let Some(sink) = self.sink() {
                sink.on_error(&ErrorEvent::Malformed(e));
            }
        }
    }

    /// Transport "close" event.
    ///
    /// Moves to `Disconnected`, cancels heartbeats and reports
    /// `ErrorEvent::ConnectionLost` unless the close was requested through
    /// [`Connection::disconnect`]. Repeated close events are ignored.
    pub fn handle_close(&self, reason: &str) {
        let notify = {
            let mut s = self.inner.session.lock();
            s.transport_open = false;
            let attached = std::mem::replace(&mut s.close_handler_attached, false);
            let reason = s.close_reason.take().unwrap_or_else(|| reason.to_string());
            if s.state == State::Disconnected && !attached {
                return;
            }
            let sink = if attached { s.sink.clone() } else { None };
            s.teardown(self.inner.scheduler.as_ref());
            sink.map(|sink| (sink, reason))
        };

        if let Some((sink, reason)) = notify {
            tracing::debug!("connection lost: {}", reason);
            self.inner.config.debug(|| format!("connection lost: {}", reason));
            sink.on_error(&ErrorEvent::ConnectionLost(reason));
        }
    }

    // =========================================================================
    // Inbound dispatch
    // =========================================================================

    fn dispatch(&self, frame: Frame) {
        match frame.kind() {
            Some(Command::Connected) => self.on_connected_frame(frame),
            Some(Command::Message) => self.deliver(frame),
            Some(Command::Receipt) => {
                if let Some(sink) = self.sink() {
                    sink.on_receipt(&frame);
                }
            }
            Some(Command::Error) => {
                tracing::warn!(
                    "ERROR frame from broker: {}",
                    frame.get_header(names::MESSAGE).unwrap_or("")
                );
                if let Some(sink) = self.sink() {
                    sink.on_error(&ErrorEvent::Broker(frame));
                }
            }
            _ => tracing::debug!("Unhandled frame: {}", frame.command),
        }
    }

    fn sink(&self) -> Option<Arc<dyn EventSink>> {
        self.inner.session.lock().sink.clone()
    }

    fn on_connected_frame(&self, frame: Frame) {
        let sink = {
            let mut s = self.inner.session.lock();
            if s.state != State::Connecting {
                tracing::debug!("ignoring CONNECTED in state {:?}", s.state);
                return;
            }
            let version = frame
                .get_header(names::VERSION)
                .and_then(|v| v.parse::<Version>().ok())
                .unwrap_or(Version::V1_0);
            tracing::debug!(
                "connected to server {} (STOMP {})",
                frame.get_header(names::SERVER).unwrap_or("unknown"),
                version
            );
            s.state = State::Connected;
            s.version = Some(version);
            s.codec = StompCodec::with_escaping(Escaping::for_version(version));
            if version.supports_heartbeat() {
                let server_hb = frame.get_header(names::HEART_BEAT).unwrap_or("0,0");
                self.start_heartbeat(&mut s, server_hb);
            }
            s.sink.clone()
        };
        if let Some(sink) = sink {
            sink.on_connected(&frame);
        }
    }

    fn deliver(&self, frame: Frame) {
        let (handler, sink): (Option<MessageHandler>, _) = {
            let s = self.inner.session.lock();
            let handler = frame
                .get_header(names::SUBSCRIPTION)
                .and_then(|id| s.subscriptions.handler(id));
            (handler, s.sink.clone())
        };
        let message = Message::new(frame, self.clone());
        match (handler, sink) {
            (Some(handler), _) => handler(message),
            (None, Some(sink)) => sink.on_unhandled_message(message),
            (None, None) => tracing::warn!(
                "Unhandled received MESSAGE for subscription '{}'",
                message.subscription()
            ),
        }
    }

    // =========================================================================
    // Heartbeats
    // =========================================================================

    fn start_heartbeat(&self, s: &mut Session, server_header: &str) {
        let (server_out, server_in) = parse_heartbeat_header(server_header);
        let hb = self.inner.config.heartbeat;
        let (ping, pong) =
            negotiate_heartbeats(hb.outgoing_ms, hb.incoming_ms, server_out, server_in);

        let weak = Arc::downgrade(&self.inner);
        let weak_check = weak.clone();
        s.heartbeat.start(
            self.inner.scheduler.as_ref(),
            ping,
            pong,
            move |generation| -> Task {
                Box::new(move || {
                    if let Some(conn) = upgrade(&weak) {
                        conn.send_ping(generation);
                    }
                })
            },
            move |generation, ttl| -> Task {
                Box::new(move || {
                    if let Some(conn) = upgrade(&weak_check) {
                        conn.check_liveness(generation, ttl);
                    }
                })
            },
        );
    }

    fn send_ping(&self, generation: u64) {
        let _guard = self.inner.send_lock.lock();
        {
            let s = self.inner.session.lock();
            if s.heartbeat.generation() != generation || s.state != State::Connected {
                return;
            }
        }
        match self.inner.transport.send(Bytes::from_static(b"\n")) {
            Ok(()) => {
                self.inner.config.debug(|| ">>> PING".to_string());
                tracing::trace!(">>> PING");
            }
            Err(e) => tracing::warn!("failed to send heartbeat: {}", e),
        }
    }

    fn check_liveness(&self, generation: u64, ttl: Duration) {
        {
            let mut s = self.inner.session.lock();
            if s.heartbeat.generation() != generation {
                return;
            }
            let elapsed = s.heartbeat.since_activity(self.inner.scheduler.now());
            if !liveness_expired(elapsed, ttl) {
                return;
            }
            tracing::warn!(
                "did not receive server activity for the last {}ms",
                elapsed.as_millis()
            );
            s.close_reason = Some(format!(
                "no server activity for {}ms (heartbeat timeout)",
                elapsed.as_millis()
            ));
            s.heartbeat.stop(self.inner.scheduler.as_ref());
        }
        self.inner.transport.close();
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Encode and write a frame, splitting it into `max_frame_size` pieces
    /// when it is larger.
    fn transmit(&self, frame: &Frame) -> Result<(), ConnError> {
        let out = self.encode(frame);
        let _guard = self.inner.send_lock.lock();
        self.write(out)
    }

    fn encode(&self, frame: &Frame) -> Bytes {
        let codec = self.inner.session.lock().codec;
        let out = codec.marshal(frame);
        self.inner
            .config
            .debug(|| format!(">>> {}", String::from_utf8_lossy(&out)));
        tracing::trace!(">>> {} ({} bytes)", frame.command, out.len());
        out
    }

    /// Write encoded bytes. The caller holds `send_lock`.
    fn write(&self, out: Bytes) -> Result<(), ConnError> {
        let config = &self.inner.config;
        match config.max_frame_size {
            Some(max) if out.len() > max => {
                let mut offset = 0;
                while offset < out.len() {
                    let end = (offset + max).min(out.len());
                    self.inner.transport.send(out.slice(offset..end))?;
                    offset = end;
                    config.debug(|| format!("remaining = {}", out.len() - offset));
                }
                Ok(())
            }
            _ => Ok(self.inner.transport.send(out)?),
        }
    }

    /// Send an arbitrary frame. The connection must be connecting or
    /// connected.
    pub fn send_frame(&self, frame: Frame) -> Result<(), ConnError> {
        self.inner.session.lock().ensure_active()?;
        self.transmit(&frame)
    }

    /// Publish `body` to `destination`.
    ///
    /// `headers` may carry `transaction`, `receipt`, `content-type` and any
    /// broker-specific extension; `destination` always wins over a header of
    /// the same name.
    pub fn send(
        &self,
        destination: &str,
        headers: Headers,
        body: impl Into<Vec<u8>>,
    ) -> Result<(), ConnError> {
        let frame = Frame::new(Command::Send)
            .headers(&headers)
            .header(names::DESTINATION, destination)
            .set_body(body);
        self.send_frame(frame)
    }

    /// Subscribe to a destination.
    ///
    /// Parameters
    /// - `destination`: the STOMP destination (e.g. "/queue/foo").
    /// - `headers`: extra SUBSCRIBE headers. A non-empty `id` is used as the
    ///   subscription id; otherwise one is generated (`sub-N`).
    /// - `on_message`: called for every MESSAGE whose `subscription` header
    ///   matches the id.
    pub fn subscribe(
        &self,
        destination: &str,
        headers: Headers,
        on_message: impl Fn(Message) + Send + Sync + 'static,
    ) -> Result<Subscription, ConnError> {
        let id = {
            let mut s = self.inner.session.lock();
            s.ensure_active()?;
            let id = SubscriptionRegistry::resolve_id(headers.get(names::ID), &mut s.counter);
            s.subscriptions
                .insert(id.clone(), destination.to_string(), Arc::new(on_message));
            id
        };

        let frame = Frame::new(Command::Subscribe)
            .headers(&headers)
            .header(names::ID, id.as_str())
            .header(names::DESTINATION, destination);
        if let Err(e) = self.transmit(&frame) {
            self.inner.session.lock().subscriptions.remove(&id);
            return Err(e);
        }
        tracing::debug!("subscribed {} to {}", id, destination);
        Ok(Subscription::new(id, destination.to_string(), self.clone()))
    }

    /// Drop the callback for `id` and send UNSUBSCRIBE. The frame is sent
    /// even when `id` is not known locally.
    pub fn unsubscribe(&self, id: &str) -> Result<(), ConnError> {
        {
            let mut s = self.inner.session.lock();
            match s.subscriptions.destination(id) {
                Some(destination) => tracing::debug!("unsubscribing {} from {}", id, destination),
                None => tracing::debug!("unsubscribing unknown id {}", id),
            }
            s.subscriptions.remove(id);
            s.ensure_active()?;
        }
        self.transmit(&Frame::new(Command::Unsubscribe).header(names::ID, id))
    }

    /// Begin a transaction. Without an id (or with an empty one) a `tx-N`
    /// id is generated.
    pub fn begin(&self, transaction_id: Option<&str>) -> Result<Transaction, ConnError> {
        let id = {
            let mut s = self.inner.session.lock();
            s.ensure_active()?;
            TransactionRegistry::resolve_id(transaction_id, &mut s.counter)
        };
        self.send_transaction_frame(Command::Begin, &id)?;
        self.inner.session.lock().transactions.begin(&id);
        Ok(Transaction::new(id, self.clone()))
    }

    /// Commit a transaction.
    pub fn commit(&self, transaction_id: &str) -> Result<(), ConnError> {
        self.send_transaction_frame(Command::Commit, transaction_id)?;
        self.inner.session.lock().transactions.finish(transaction_id);
        Ok(())
    }

    /// Abort a transaction.
    pub fn abort(&self, transaction_id: &str) -> Result<(), ConnError> {
        self.send_transaction_frame(Command::Abort, transaction_id)?;
        self.inner.session.lock().transactions.finish(transaction_id);
        Ok(())
    }

    /// Helper to send a transaction frame (BEGIN, COMMIT, or ABORT).
    fn send_transaction_frame(&self, command: Command, transaction_id: &str) -> Result<(), ConnError> {
        self.send_frame(Frame::new(command).header(names::TRANSACTION, transaction_id))
    }

    /// Acknowledge a message.
    ///
    /// Sends ACK with `message-id` and `subscription` set over any extra
    /// `headers` (e.g. `transaction`).
    pub fn ack(
        &self,
        message_id: &str,
        subscription_id: &str,
        headers: Headers,
    ) -> Result<(), ConnError> {
        self.send_ack_frame(Command::Ack, message_id, subscription_id, headers)
    }

    /// Negative-acknowledge a message.
    pub fn nack(
        &self,
        message_id: &str,
        subscription_id: &str,
        headers: Headers,
    ) -> Result<(), ConnError> {
        self.send_ack_frame(Command::Nack, message_id, subscription_id, headers)
    }

    fn send_ack_frame(
        &self,
        command: Command,
        message_id: &str,
        subscription_id: &str,
        headers: Headers,
    ) -> Result<(), ConnError> {
        let frame = Frame::new(command)
            .headers(&headers)
            .header(names::MESSAGE_ID, message_id)
            .header(names::SUBSCRIPTION, subscription_id);
        self.send_frame(frame)
    }
}

fn upgrade(weak: &Weak<Inner>) -> Option<Connection> {
    weak.upgrade().map(|inner| Connection { inner })
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.inner.session.lock();
        f.debug_struct("Connection")
            .field("state", &s.state)
            .field("version", &s.version)
            .field("subscriptions", &s.subscriptions.ids())
            .finish()
    }
}
