//! End-to-end exchange over the TCP binding against an in-process broker.

use std::time::Duration;
use stomp_over::transport::tcp;
use stomp_over::{Callbacks, Command, Config, ErrorEvent, Frame, Headers, marshal, unmarshal_one};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Read bytes until a NUL terminator and decode the frame.
async fn read_frame(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Option<Frame> {
    loop {
        if let Some(pos) = buf.iter().position(|&b| b == 0) {
            let raw: Vec<u8> = buf.drain(..=pos).collect();
            return Some(unmarshal_one(&raw).expect("client sent a valid frame"));
        }
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

#[tokio::test]
async fn connect_subscribe_receive_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let broker = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut buf = Vec::new();

        let connect = read_frame(&mut stream, &mut buf).await.expect("CONNECT");
        assert_eq!(connect.command, "CONNECT");
        assert_eq!(connect.get_header("accept-version"), Some("1.0,1.1,1.2"));
        let connected = Frame::new(Command::Connected)
            .header("version", "1.2")
            .header("heart-beat", "0,0");
        stream.write_all(&marshal(&connected)).await.expect("write");

        let subscribe = read_frame(&mut stream, &mut buf).await.expect("SUBSCRIBE");
        assert_eq!(subscribe.command, "SUBSCRIBE");
        let id = subscribe.get_header("id").expect("id").to_string();

        // deliver the MESSAGE in two writes to exercise reassembly
        let message = marshal(
            &Frame::new(Command::Message)
                .header("subscription", id.as_str())
                .header("message-id", "m-1")
                .header("destination", "/queue/tcp")
                .set_body(b"over tcp".to_vec()),
        );
        let (head, tail) = message.split_at(10);
        stream.write_all(head).await.expect("write");
        stream.flush().await.expect("flush");
        tokio::time::sleep(Duration::from_millis(20)).await;
        stream.write_all(tail).await.expect("write");

        let ack = read_frame(&mut stream, &mut buf).await.expect("ACK");
        assert_eq!(ack.command, "ACK");
        assert_eq!(ack.get_header("message-id"), Some("m-1"));

        let disconnect = read_frame(&mut stream, &mut buf).await.expect("DISCONNECT");
        assert_eq!(disconnect.command, "DISCONNECT");

        // client closes after DISCONNECT
        assert!(read_frame(&mut stream, &mut buf).await.is_none());
    });

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<String>();
    let conn = tcp::connect(addr, Config::default().heartbeat(0, 0))
        .await
        .expect("tcp connect");

    let connected_tx = event_tx.clone();
    let error_tx = event_tx.clone();
    conn.connect(
        Headers::new().with("host", "/"),
        Callbacks::new(move |_| {
            let _ = connected_tx.send("connected".into());
        })
        .on_error(move |e| {
            let _ = error_tx.send(format!("error: {}", e));
        }),
    )
    .expect("connect");

    let first = timeout(Duration::from_secs(5), event_rx.recv())
        .await
        .expect("timely CONNECTED");
    assert_eq!(first.as_deref(), Some("connected"));

    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();
    conn.subscribe("/queue/tcp", Headers::new(), move |m| {
        m.ack(Headers::new()).expect("ack");
        let _ = msg_tx.send(m.body_text().into_owned());
    })
    .expect("subscribe");

    let body = timeout(Duration::from_secs(5), msg_rx.recv())
        .await
        .expect("timely MESSAGE");
    assert_eq!(body.as_deref(), Some("over tcp"));

    conn.disconnect(Headers::new()).expect("disconnect");
    timeout(Duration::from_secs(5), broker)
        .await
        .expect("broker finished")
        .expect("broker assertions");

    // a requested disconnect is not an error
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(event_rx.try_recv().is_err());
}

#[tokio::test]
async fn broker_hangup_reports_connection_lost() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut buf = Vec::new();
        let _ = read_frame(&mut stream, &mut buf).await;
        drop(stream);
    });

    let (tx, mut rx) = mpsc::unbounded_channel::<ErrorEvent>();
    let conn = tcp::connect(addr, Config::default()).await.expect("tcp connect");
    conn.connect(
        Headers::new(),
        Callbacks::new(|_| {}).on_error(move |e| {
            let _ = tx.send(e.clone());
        }),
    )
    .expect("connect");

    let event = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timely close")
        .expect("event");
    match event {
        ErrorEvent::ConnectionLost(reason) => assert!(reason.contains("Lost connection")),
        other => panic!("unexpected event {:?}", other),
    }
    assert!(!conn.is_connected());
}
