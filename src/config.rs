use std::fmt;
use std::sync::Arc;

use crate::frame::Version;
use crate::heartbeat::HeartbeatConfig;

/// Default upper bound for a single outbound transport message.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024;

/// Sink receiving human-readable wire dumps (`>>> ...`, `<<< ...`).
pub type DebugSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Options recognised when a [`Connection`](crate::Connection) is built.
///
/// Use the builder methods to customise; `Config::default()` proposes
/// `10000,10000` heartbeats, chunks outbound frames at 16 KiB and offers
/// every supported protocol version.
#[derive(Clone)]
pub struct Config {
    /// Heart-beat proposal sent in CONNECT.
    pub heartbeat: HeartbeatConfig,
    /// Outbound frames longer than this are written as several transport
    /// messages. `None` sends every frame in one message.
    ///
    /// Splitting is only safe when the receiving side reassembles the
    /// pieces into one byte stream (TCP does; many WebSocket brokers treat
    /// each message as a separate frame). Disable it for those.
    pub max_frame_size: Option<usize>,
    /// Versions offered in `accept-version`.
    pub accept_versions: Vec<Version>,
    debug: Option<DebugSink>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the heart-beat proposal in milliseconds (0 disables a direction).
    pub fn heartbeat(mut self, outgoing_ms: u64, incoming_ms: u64) -> Self {
        self.heartbeat = HeartbeatConfig::new(outgoing_ms, incoming_ms);
        self
    }

    pub fn max_frame_size(mut self, max: Option<usize>) -> Self {
        self.max_frame_size = max.filter(|&n| n > 0);
        self
    }

    /// Restrict the versions offered to the broker. An empty list keeps the
    /// default of every supported version.
    pub fn accept_versions(mut self, versions: &[Version]) -> Self {
        if !versions.is_empty() {
            let mut v = versions.to_vec();
            v.sort();
            v.dedup();
            self.accept_versions = v;
        }
        self
    }

    /// Install a sink receiving wire dumps of every frame sent and received.
    pub fn debug_sink(mut self, sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.debug = Some(Arc::new(sink));
        self
    }

    pub(crate) fn debug(&self, message: impl FnOnce() -> String) {
        if let Some(sink) = &self.debug {
            sink(&message());
        }
    }

    /// Value of the CONNECT `accept-version` header, e.g. "1.0,1.1,1.2".
    pub fn accept_version_header(&self) -> String {
        self.accept_versions
            .iter()
            .map(Version::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatConfig::default(),
            max_frame_size: Some(DEFAULT_MAX_FRAME_SIZE),
            accept_versions: vec![Version::V1_0, Version::V1_1, Version::V1_2],
            debug: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("heartbeat", &self.heartbeat)
            .field("max_frame_size", &self.max_frame_size)
            .field("accept_versions", &self.accept_versions)
            .field("debug", &self.debug.is_some())
            .finish()
    }
}
