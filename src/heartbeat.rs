use std::time::{Duration, Instant};

use crate::scheduler::{Scheduler, Task, TimerId};

/// Client heart-beat proposal, in milliseconds. `0` disables a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// How often the client offers to send heartbeats.
    pub outgoing_ms: u64,
    /// How often the client wants to hear from the server.
    pub incoming_ms: u64,
}

impl HeartbeatConfig {
    pub fn new(outgoing_ms: u64, incoming_ms: u64) -> Self {
        Self {
            outgoing_ms,
            incoming_ms,
        }
    }

    pub fn disabled() -> Self {
        Self::new(0, 0)
    }

    /// Value for the CONNECT `heart-beat` header ("<outgoing>,<incoming>").
    pub fn header_value(&self) -> String {
        format!("{},{}", self.outgoing_ms, self.incoming_ms)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::new(10_000, 10_000)
    }
}

/// Parse the STOMP `heart-beat` header value (format: "cx,cy").
///
/// Parameters
/// - `header`: header string from the server or client (for example
///   "10000,10000"). The values represent milliseconds.
///
/// Returns a tuple `(cx, cy)` where each value is the heartbeat interval in
/// milliseconds. Missing or invalid fields default to `0`.
pub fn parse_heartbeat_header(header: &str) -> (u64, u64) {
    let mut parts = header.split(',');
    let cx = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let cy = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    (cx, cy)
}

/// Negotiate heartbeat intervals between client and server.
///
/// Parameters
/// - `client_out`: client's outgoing interval (how often it will ping).
/// - `client_in`: client's incoming interval (how often it expects traffic).
/// - `server_out`: server's advertised outgoing interval.
/// - `server_in`: server's advertised incoming interval.
///
/// Returns `(ping, pong)`. The ping interval is `max(client_out, server_in)`
/// and exists only when both sides are nonzero; likewise the pong-check
/// interval is `max(client_in, server_out)` when both are nonzero.
pub fn negotiate_heartbeats(
    client_out: u64,
    client_in: u64,
    server_out: u64,
    server_in: u64,
) -> (Option<Duration>, Option<Duration>) {
    let ping = if client_out == 0 || server_in == 0 {
        None
    } else {
        Some(Duration::from_millis(client_out.max(server_in)))
    };
    let pong = if client_in == 0 || server_out == 0 {
        None
    } else {
        Some(Duration::from_millis(client_in.max(server_out)))
    };
    (ping, pong)
}

/// True when no server activity was seen for more than twice the pong
/// interval.
pub fn liveness_expired(since_activity: Duration, pong_interval: Duration) -> bool {
    since_activity > pong_interval.saturating_mul(2)
}

/// Timer bookkeeping for one connection.
///
/// The monitor owns the pinger/ponger timer ids and a generation counter.
/// Tasks capture the generation they were scheduled under and must compare
/// it with [`HeartbeatMonitor::generation`] before acting, so a tick that
/// races with [`HeartbeatMonitor::stop`] does nothing.
#[derive(Debug)]
pub(crate) struct HeartbeatMonitor {
    generation: u64,
    pinger: Option<TimerId>,
    ponger: Option<TimerId>,
    last_activity: Option<Instant>,
}

impl HeartbeatMonitor {
    pub(crate) fn new() -> Self {
        Self {
            generation: 0,
            pinger: None,
            ponger: None,
            last_activity: None,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn is_running(&self) -> bool {
        self.pinger.is_some() || self.ponger.is_some()
    }

    pub(crate) fn record_activity(&mut self, now: Instant) {
        self.last_activity = Some(now);
    }

    /// Time since the last recorded server activity, or zero if none yet.
    pub(crate) fn since_activity(&self, now: Instant) -> Duration {
        self.last_activity
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default()
    }

    /// Schedule the ping and pong-check timers.
    ///
    /// Any previous timers are stopped first. `ping` and `check` are built
    /// with the new generation so they can detect cancellation.
    pub(crate) fn start(
        &mut self,
        scheduler: &dyn Scheduler,
        ping_interval: Option<Duration>,
        pong_interval: Option<Duration>,
        ping: impl FnOnce(u64) -> Task,
        check: impl FnOnce(u64, Duration) -> Task,
    ) {
        self.stop(scheduler);
        self.record_activity(scheduler.now());
        let generation = self.generation;

        if let Some(ttl) = ping_interval {
            tracing::debug!("send PING every {}ms", ttl.as_millis());
            self.pinger = Some(scheduler.schedule_repeating(ttl, ping(generation)));
        }
        if let Some(ttl) = pong_interval {
            tracing::debug!("check PONG every {}ms", ttl.as_millis());
            self.ponger = Some(scheduler.schedule_repeating(ttl, check(generation, ttl)));
        }
    }

    /// Cancel both timers and invalidate tasks scheduled so far.
    pub(crate) fn stop(&mut self, scheduler: &dyn Scheduler) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(id) = self.pinger.take() {
            scheduler.cancel(id);
        }
        if let Some(id) = self.ponger.take() {
            scheduler.cancel(id);
        }
    }
}
