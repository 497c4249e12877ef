use std::io::{self, BufRead, Write};
use std::time::Duration;
use stomp_over::transport::tcp;
use stomp_over::{Callbacks, Config, Connection, ErrorEvent, Frame, Headers, parse_heartbeat_header};
use tokio::sync::mpsc;

use super::args::Cli;
use super::commands::{CommandResult, execute_command, print_frame, print_help, subscribe_destination};
use super::exit_codes;

/// Connection-level events forwarded from the library callbacks
enum SessionEvent {
    Connected(Frame),
    Error(ErrorEvent),
}

/// Run the CLI in plain line-oriented mode
pub async fn run(cli: &Cli) -> Result<(), (String, u8)> {
    println!("Connecting to {}...", cli.address);

    let (out_ms, in_ms) = parse_heartbeat_header(&cli.heartbeat);
    let mut config = Config::default()
        .heartbeat(out_ms, in_ms)
        .max_frame_size(Some(cli.max_frame_size));
    if cli.wire {
        config = config.debug_sink(|line| eprintln!("{}", line));
    }

    let conn = tcp::connect(cli.address.as_str(), config)
        .await
        .map_err(|e| format_io_error(&e, &cli.address))?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let connected_tx = event_tx.clone();
    let callbacks = Callbacks::new(move |frame| {
        let _ = connected_tx.send(SessionEvent::Connected(frame.clone()));
    })
    .on_error(move |err| {
        let _ = event_tx.send(SessionEvent::Error(err.clone()));
    })
    .on_receipt(|frame| print_frame("RECEIPT received:", frame))
    .on_unhandled_message(|message| print_frame("Unhandled MESSAGE:", message.frame()));

    let headers = Headers::new()
        .with("host", cli.host.as_str())
        .with("login", cli.login.as_str())
        .with("passcode", cli.passcode.as_str());
    conn.connect(headers, callbacks).map_err(|e| {
        (
            format!("Failed to send CONNECT: {}", e),
            exit_codes::NETWORK_ERROR,
        )
    })?;

    wait_connected(&mut event_rx, Duration::from_secs(cli.connect_timeout)).await?;

    for dest in &cli.subscribe {
        match subscribe_destination(&conn, dest) {
            Ok(id) => println!("Subscribed to {} as {}", dest, id),
            Err(msg) => return Err((msg, exit_codes::PROTOCOL_ERROR)),
        }
    }

    // Channel to receive user commands from stdin reader
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<String>(16);

    // Spawn blocking stdin reader
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if cmd_tx.blocking_send(l).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    println!();
    print_help();
    println!();

    loop {
        print!("> ");
        let _ = io::stdout().flush();

        tokio::select! {
            line = cmd_rx.recv() => {
                let Some(line) = line else {
                    disconnect(&conn);
                    break;
                };
                match execute_command(&line, &conn) {
                    CommandResult::Ok => {}
                    CommandResult::Quit => {
                        disconnect(&conn);
                        break;
                    }
                    CommandResult::Info(msg) => println!("{}", msg),
                    CommandResult::Error(msg) => eprintln!("{}", msg),
                }
            }
            event = event_rx.recv() => {
                match event {
                    Some(SessionEvent::Error(ErrorEvent::ConnectionLost(reason))) => {
                        return Err((format!("\n{}", reason), exit_codes::NETWORK_ERROR));
                    }
                    Some(SessionEvent::Error(ErrorEvent::Broker(frame))) => {
                        print_frame("[BROKER ERROR]", &frame);
                    }
                    Some(SessionEvent::Error(err)) => eprintln!("\n{}", err),
                    Some(SessionEvent::Connected(_)) => {}
                    None => break,
                }
            }
        }
    }

    // let the writer task flush DISCONNECT before the runtime shuts down
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}

async fn wait_connected(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    limit: Duration,
) -> Result<(), (String, u8)> {
    match tokio::time::timeout(limit, events.recv()).await {
        Ok(Some(SessionEvent::Connected(frame))) => {
            println!(
                "Connected (STOMP {}, server {}).",
                frame.get_header("version").unwrap_or("1.0"),
                frame.get_header("server").unwrap_or("unknown")
            );
            Ok(())
        }
        Ok(Some(SessionEvent::Error(ErrorEvent::Broker(frame)))) => {
            let mut message = format!(
                "Connection rejected: {}",
                frame.get_header("message").unwrap_or("ERROR")
            );
            if !frame.body.is_empty() {
                message.push_str(&format!(" ({})", frame.body_text().trim()));
            }
            Err((message, exit_codes::AUTH_ERROR))
        }
        Ok(Some(SessionEvent::Error(err))) => Err((err.to_string(), exit_codes::NETWORK_ERROR)),
        Ok(None) => Err((
            "Connection closed before CONNECTED".to_string(),
            exit_codes::NETWORK_ERROR,
        )),
        Err(_) => Err((
            format!("No CONNECTED frame within {}s", limit.as_secs()),
            exit_codes::PROTOCOL_ERROR,
        )),
    }
}

fn disconnect(conn: &Connection) {
    println!("Disconnecting...");
    if let Err(e) = conn.disconnect(Headers::new()) {
        tracing::debug!("disconnect: {}", e);
    }
}

/// Format a socket error with user-friendly messaging
fn format_io_error(err: &io::Error, address: &str) -> (String, u8) {
    let message = match err.kind() {
        io::ErrorKind::ConnectionRefused => format!("Connection refused: {}", address),
        io::ErrorKind::TimedOut => format!("Connection timed out: {}", address),
        _ => format!("Connection failed: {}", err),
    };
    (message, exit_codes::NETWORK_ERROR)
}
