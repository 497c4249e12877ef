//! In-memory transport and virtual-time scheduler shared by the
//! integration tests.
#![allow(dead_code)]

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use stomp_over::{
    Config, Connection, ErrorEvent, EventSink, Frame, Headers, Message, Scheduler, Task, TimerId,
    Transport, marshal, unmarshal,
};

/// Transport that records every send and counts close requests.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Bytes>>,
    closes: AtomicUsize,
    fail_sends: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    /// Decode everything sent so far into frames (heartbeats are skipped).
    pub fn frames(&self) -> Vec<Frame> {
        let joined: Vec<u8> = self.sent.lock().iter().flat_map(|b| b.to_vec()).collect();
        let out = unmarshal(&joined);
        assert!(out.errors.is_empty(), "sent bytes decode: {:?}", out.errors);
        assert!(out.partial.is_empty(), "sent bytes end mid-frame");
        out.frames
    }

    /// Frames sent so far, then forget them.
    pub fn take_frames(&self) -> Vec<Frame> {
        let frames = self.frames();
        self.clear();
        frames
    }

    pub fn last_frame(&self) -> Frame {
        self.frames().pop().expect("no frame sent")
    }

    pub fn pings(&self) -> usize {
        self.sent.lock().iter().filter(|b| b.as_ref() == b"\n").count()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

impl Transport for RecordingTransport {
    fn send(&self, data: Bytes) -> std::io::Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "transport gone",
            ));
        }
        self.sent.lock().push(data);
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

struct Timer {
    interval: Duration,
    next_due: Instant,
    task: Option<Task>,
}

struct Clock {
    now: Instant,
    next_id: u64,
    timers: BTreeMap<u64, Timer>,
}

/// Scheduler whose clock only moves through [`ManualScheduler::advance`].
pub struct ManualScheduler {
    clock: Mutex<Clock>,
}

impl ManualScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clock: Mutex::new(Clock {
                now: Instant::now(),
                next_id: 1,
                timers: BTreeMap::new(),
            }),
        })
    }

    /// Move the clock forward, running every timer tick that falls due, in
    /// deadline order. Tasks run without the clock lock held.
    pub fn advance(&self, by: Duration) {
        let target = self.clock.lock().now + by;
        loop {
            let next = {
                let clock = self.clock.lock();
                clock
                    .timers
                    .iter()
                    .filter(|(_, t)| t.task.is_some() && t.next_due <= target)
                    .min_by_key(|(id, t)| (t.next_due, **id))
                    .map(|(id, _)| *id)
            };
            let Some(id) = next else { break };

            let mut task = {
                let mut clock = self.clock.lock();
                let Some(timer) = clock.timers.get_mut(&id) else { continue };
                let due = timer.next_due;
                timer.next_due = due + timer.interval;
                let task = timer.task.take();
                clock.now = due;
                match task {
                    Some(task) => task,
                    None => continue,
                }
            };
            task();
            if let Some(timer) = self.clock.lock().timers.get_mut(&id) {
                timer.task = Some(task);
            }
        }
        self.clock.lock().now = target;
    }

    /// Intervals of the timers still scheduled, sorted.
    pub fn intervals(&self) -> Vec<Duration> {
        let mut v: Vec<Duration> = self
            .clock
            .lock()
            .timers
            .values()
            .map(|t| t.interval)
            .collect();
        v.sort();
        v
    }

    pub fn active(&self) -> usize {
        self.clock.lock().timers.len()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_repeating(&self, interval: Duration, task: Task) -> TimerId {
        let mut clock = self.clock.lock();
        let id = clock.next_id;
        clock.next_id += 1;
        let next_due = clock.now + interval;
        clock.timers.insert(
            id,
            Timer {
                interval,
                next_due,
                task: Some(task),
            },
        );
        TimerId(id)
    }

    fn cancel(&self, id: TimerId) {
        self.clock.lock().timers.remove(&id.0);
    }

    fn now(&self) -> Instant {
        self.clock.lock().now
    }
}

/// Event observed by [`RecordingSink`].
#[derive(Debug, Clone)]
pub enum SinkEvent {
    Connected(Frame),
    Error(ErrorEvent),
    Receipt(Frame),
    Unhandled(Frame),
}

/// Event sink that records every callback.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<SinkEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    pub fn connected_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, SinkEvent::Connected(_)))
            .count()
    }

    pub fn errors(&self) -> Vec<ErrorEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Error(err) => Some(err),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn on_connected(&self, frame: &Frame) {
        self.events.lock().push(SinkEvent::Connected(frame.clone()));
    }

    fn on_error(&self, error: &ErrorEvent) {
        self.events.lock().push(SinkEvent::Error(error.clone()));
    }

    fn on_receipt(&self, frame: &Frame) {
        self.events.lock().push(SinkEvent::Receipt(frame.clone()));
    }

    fn on_unhandled_message(&self, message: Message) {
        self.events
            .lock()
            .push(SinkEvent::Unhandled(message.into_frame()));
    }
}

pub struct Harness {
    pub conn: Connection,
    pub transport: Arc<RecordingTransport>,
    pub scheduler: Arc<ManualScheduler>,
    pub sink: RecordingSink,
}

impl Harness {
    pub fn new(config: Config) -> Self {
        let transport = RecordingTransport::new();
        let scheduler = ManualScheduler::new();
        let conn = Connection::new(
            transport.clone() as Arc<dyn Transport>,
            scheduler.clone() as Arc<dyn Scheduler>,
            config,
        );
        Self {
            conn,
            transport,
            scheduler,
            sink: RecordingSink::new(),
        }
    }

    /// Open the transport, send CONNECT and answer with CONNECTED carrying
    /// `version` and `heart_beat`. Outbound frames so far are cleared.
    pub fn connected(config: Config, version: &str, heart_beat: &str) -> Self {
        let h = Self::new(config);
        h.conn.handle_open();
        h.conn
            .connect(Headers::new().with("host", "/"), h.sink.clone())
            .expect("connect");
        h.server(&connected_frame(version, heart_beat));
        h.transport.clear();
        h
    }

    /// Deliver a frame from the "server" as one transport message.
    pub fn server(&self, frame: &Frame) {
        self.conn.handle_message(&marshal(frame));
    }
}

pub fn connected_frame(version: &str, heart_beat: &str) -> Frame {
    Frame::new("CONNECTED")
        .header("version", version)
        .header("heart-beat", heart_beat)
        .header("server", "test-broker/1.0")
}

pub fn message_frame(subscription: &str, message_id: &str, body: &str) -> Frame {
    Frame::new("MESSAGE")
        .header("subscription", subscription)
        .header("message-id", message_id)
        .header("destination", "/queue/test")
        .set_body(body.as_bytes().to_vec())
}
