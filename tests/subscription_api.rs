//! Subscribing, message dispatch, acknowledgement and outbound chunking.

mod support;

use parking_lot::Mutex;
use std::sync::Arc;
use stomp_over::{Config, ConnError, Headers, Message, marshal};
use support::{Harness, SinkEvent, message_frame};

fn collector() -> (Arc<Mutex<Vec<Message>>>, impl Fn(Message) + Send + Sync + 'static) {
    let store: Arc<Mutex<Vec<Message>>> = Arc::default();
    let sink = store.clone();
    (store, move |m: Message| sink.lock().push(m))
}

// =============================================================================
// subscribe / unsubscribe
// =============================================================================

#[test]
fn subscribe_sends_frame_with_generated_id() {
    let h = Harness::connected(Config::default(), "1.2", "0,0");
    let sub = h
        .conn
        .subscribe("/queue/a", Headers::new().with("ack", "client"), |_| {})
        .expect("subscribe");

    let frame = h.transport.last_frame();
    assert_eq!(frame.command, "SUBSCRIBE");
    assert_eq!(frame.get_header("destination"), Some("/queue/a"));
    assert_eq!(frame.get_header("ack"), Some("client"));
    assert_eq!(frame.get_header("id"), Some(sub.id()));
    assert_eq!(sub.destination(), "/queue/a");
}

#[test]
fn generated_ids_are_unique() {
    let h = Harness::connected(Config::default(), "1.2", "0,0");
    let ids: Vec<String> = (0..5)
        .map(|_| {
            h.conn
                .subscribe("/topic/t", Headers::new(), |_| {})
                .expect("subscribe")
                .id()
                .to_string()
        })
        .collect();
    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 5);
    assert_eq!(h.conn.subscription_ids().len(), 5);
}

#[test]
fn explicit_id_is_used() {
    let h = Harness::connected(Config::default(), "1.2", "0,0");
    let sub = h
        .conn
        .subscribe("/queue/a", Headers::new().with("id", "mine"), |_| {})
        .expect("subscribe");
    assert_eq!(sub.id(), "mine");
    assert_eq!(h.transport.last_frame().get_header("id"), Some("mine"));

    let generated = h
        .conn
        .subscribe("/queue/b", Headers::new().with("id", ""), |_| {})
        .expect("subscribe");
    assert!(generated.id().starts_with("sub-"));
}

#[test]
fn unsubscribe_sends_frame_and_stops_delivery() {
    let h = Harness::connected(Config::default(), "1.1", "0,0");
    let (received, handler) = collector();
    let sub = h
        .conn
        .subscribe("/queue/a", Headers::new(), handler)
        .expect("subscribe");

    sub.unsubscribe().expect("unsubscribe");
    let frame = h.transport.last_frame();
    assert_eq!(frame.command, "UNSUBSCRIBE");
    assert_eq!(frame.get_header("id"), Some(sub.id()));
    assert!(h.conn.subscription_ids().is_empty());

    h.server(&message_frame(sub.id(), "m-1", "late"));
    assert!(received.lock().is_empty());
    assert!(h
        .sink
        .events()
        .iter()
        .any(|e| matches!(e, SinkEvent::Unhandled(_))));
}

#[test]
fn unsubscribe_unknown_id_still_sends() {
    let h = Harness::connected(Config::default(), "1.1", "0,0");
    h.conn.unsubscribe("never-seen").expect("unsubscribe");
    assert_eq!(
        h.transport.last_frame().get_header("id"),
        Some("never-seen")
    );
}

#[test]
fn operations_require_connection() {
    let h = Harness::new(Config::default());
    assert!(matches!(
        h.conn.subscribe("/q", Headers::new(), |_| {}),
        Err(ConnError::NotConnected)
    ));
    assert!(matches!(
        h.conn.send("/q", Headers::new(), "x"),
        Err(ConnError::NotConnected)
    ));
    assert!(h.transport.sent().is_empty());
}

#[test]
fn failed_subscribe_leaves_no_callback() {
    let h = Harness::connected(Config::default(), "1.1", "0,0");
    h.transport.fail_sends(true);
    let err = h.conn.subscribe("/q", Headers::new(), |_| {}).unwrap_err();
    assert!(matches!(err, ConnError::Io(_)));
    assert!(h.conn.subscription_ids().is_empty());
}

// =============================================================================
// dispatch
// =============================================================================

#[test]
fn messages_go_to_the_matching_subscription() {
    let h = Harness::connected(Config::default(), "1.2", "0,0");
    let (a_msgs, a) = collector();
    let (b_msgs, b) = collector();
    let sub_a = h.conn.subscribe("/queue/a", Headers::new(), a).expect("a");
    let sub_b = h.conn.subscribe("/queue/b", Headers::new(), b).expect("b");

    h.server(&message_frame(sub_b.id(), "m-1", "for b"));
    h.server(&message_frame(sub_a.id(), "m-2", "for a"));
    h.server(&message_frame(sub_b.id(), "m-3", "b again"));

    let a_bodies: Vec<String> = a_msgs.lock().iter().map(|m| m.body_text().into_owned()).collect();
    let b_bodies: Vec<String> = b_msgs.lock().iter().map(|m| m.body_text().into_owned()).collect();
    assert_eq!(a_bodies, vec!["for a"]);
    assert_eq!(b_bodies, vec!["for b", "b again"]);
}

#[test]
fn frames_in_one_message_dispatch_in_order() {
    let h = Harness::connected(Config::default(), "1.2", "0,0");
    let (received, handler) = collector();
    let sub = h.conn.subscribe("/queue/a", Headers::new(), handler).expect("subscribe");

    let mut batch = Vec::new();
    for i in 0..3 {
        batch.extend_from_slice(&marshal(&message_frame(sub.id(), &format!("m-{}", i), &i.to_string())));
    }
    h.conn.handle_message(&batch);

    let ids: Vec<String> = received.lock().iter().map(|m| m.message_id().to_string()).collect();
    assert_eq!(ids, vec!["m-0", "m-1", "m-2"]);
}

#[test]
fn unknown_subscription_goes_to_fallback() {
    let h = Harness::connected(Config::default(), "1.2", "0,0");
    h.server(&message_frame("nobody", "m-1", "orphan"));
    match h.sink.events().last() {
        Some(SinkEvent::Unhandled(frame)) => {
            assert_eq!(frame.get_header("subscription"), Some("nobody"));
            assert_eq!(frame.body, b"orphan");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn receipt_reaches_sink() {
    let h = Harness::connected(Config::default(), "1.2", "0,0");
    h.conn
        .send("/queue/a", Headers::new().with("receipt", "r-1"), "x")
        .expect("send");
    h.server(&stomp_over::Frame::new("RECEIPT").header("receipt-id", "r-1"));
    match h.sink.events().last() {
        Some(SinkEvent::Receipt(frame)) => assert_eq!(frame.get_header("receipt-id"), Some("r-1")),
        other => panic!("unexpected event {:?}", other),
    }
}

// =============================================================================
// send / ack / nack
// =============================================================================

#[test]
fn send_sets_destination_and_body() {
    let h = Harness::connected(Config::default(), "1.2", "0,0");
    h.conn
        .send(
            "/queue/a",
            Headers::new()
                .with("destination", "/ignored")
                .with("content-type", "text/plain"),
            "hello",
        )
        .expect("send");
    let frame = h.transport.last_frame();
    assert_eq!(frame.command, "SEND");
    assert_eq!(frame.get_header("destination"), Some("/queue/a"));
    assert_eq!(frame.get_header("content-type"), Some("text/plain"));
    assert_eq!(frame.get_header("content-length"), Some("5"));
    assert_eq!(frame.body, b"hello");
}

#[test]
fn message_ack_binds_ids() {
    let h = Harness::connected(Config::default(), "1.1", "0,0");
    let (received, handler) = collector();
    let sub = h.conn.subscribe("/queue/a", Headers::new(), handler).expect("subscribe");
    h.server(&message_frame(sub.id(), "m-42", "payload"));
    h.transport.clear();

    let message = received.lock().pop().expect("message");
    message
        .ack(Headers::new().with("transaction", "tx-9"))
        .expect("ack");
    let frame = h.transport.last_frame();
    assert_eq!(frame.command, "ACK");
    assert_eq!(frame.get_header("message-id"), Some("m-42"));
    assert_eq!(frame.get_header("subscription"), Some(sub.id()));
    assert_eq!(frame.get_header("transaction"), Some("tx-9"));
    assert_eq!(frame.get_header("id"), None);
}

#[test]
fn message_nack_carries_ack_header_as_id() {
    let h = Harness::connected(Config::default(), "1.2", "0,0");
    let (received, handler) = collector();
    let sub = h.conn.subscribe("/queue/a", Headers::new(), handler).expect("subscribe");
    h.server(&message_frame(sub.id(), "m-7", "payload").header("ack", "ack-7"));
    h.transport.clear();

    let message = received.lock().pop().expect("message");
    message.nack(Headers::new()).expect("nack");
    let frame = h.transport.last_frame();
    assert_eq!(frame.command, "NACK");
    assert_eq!(frame.get_header("message-id"), Some("m-7"));
    assert_eq!(frame.get_header("id"), Some("ack-7"));
}

#[test]
fn ack_from_inside_handler() {
    let h = Harness::connected(Config::default(), "1.2", "0,0");
    h.conn
        .subscribe("/queue/a", Headers::new().with("ack", "client-individual"), |m| {
            m.ack(Headers::new()).expect("ack");
        })
        .expect("subscribe");
    h.transport.clear();
    h.server(&message_frame("sub-0", "m-1", "x"));
    assert_eq!(h.transport.last_frame().command, "ACK");
}

// =============================================================================
// chunking
// =============================================================================

#[test]
fn large_frames_are_split() {
    let h = Harness::connected(Config::default().max_frame_size(Some(16)), "1.2", "0,0");
    h.conn
        .send("/queue/a", Headers::new(), "x".repeat(100))
        .expect("send");

    let chunks = h.transport.sent();
    assert!(chunks.len() > 1);
    assert!(chunks.iter().all(|c| c.len() <= 16));
    let frame = h.transport.last_frame();
    assert_eq!(frame.body.len(), 100);
}

#[test]
fn splitting_can_be_disabled() {
    let h = Harness::connected(Config::default().max_frame_size(None), "1.2", "0,0");
    h.conn
        .send("/queue/a", Headers::new(), vec![b'y'; 64 * 1024])
        .expect("send");
    assert_eq!(h.transport.sent().len(), 1);
}
