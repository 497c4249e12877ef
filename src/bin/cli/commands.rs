use std::io::{self, Write};
use stomp_over::{Connection, Frame, Headers, Message};

/// Result of executing a command
pub enum CommandResult {
    /// Command executed successfully
    Ok,
    /// Command requests exit
    Quit,
    /// Informational output
    Info(String),
    /// Error executing command
    Error(String),
}

/// Parse and execute a command
pub fn execute_command(line: &str, conn: &Connection) -> CommandResult {
    let parts: Vec<&str> = line.trim().splitn(3, ' ').collect();
    if parts.is_empty() || parts[0].is_empty() {
        return CommandResult::Ok;
    }

    match parts[0] {
        "quit" | "exit" | "q" => CommandResult::Quit,

        "send" => {
            if parts.len() < 3 {
                return CommandResult::Error("Usage: send <destination> <message>".to_string());
            }
            let headers = Headers::new().with("content-type", "text/plain");
            match conn.send(parts[1], headers, parts[2]) {
                Ok(()) => CommandResult::Ok,
                Err(e) => CommandResult::Error(format!("Send error: {}", e)),
            }
        }

        "sub" | "subscribe" => {
            if parts.len() < 2 {
                return CommandResult::Error("Usage: sub <destination>".to_string());
            }
            match subscribe_destination(conn, parts[1]) {
                Ok(id) => CommandResult::Info(format!("Subscribed to {} as {}", parts[1], id)),
                Err(msg) => CommandResult::Error(msg),
            }
        }

        "unsub" | "unsubscribe" => {
            if parts.len() < 2 {
                return CommandResult::Error("Usage: unsub <subscription-id>".to_string());
            }
            match conn.unsubscribe(parts[1]) {
                Ok(()) => CommandResult::Info(format!("Unsubscribed {}", parts[1])),
                Err(e) => CommandResult::Error(format!("Unsubscribe error: {}", e)),
            }
        }

        "begin" => match conn.begin(parts.get(1).copied()) {
            Ok(tx) => CommandResult::Info(format!("Transaction {} started", tx.id())),
            Err(e) => CommandResult::Error(format!("Begin error: {}", e)),
        },

        "commit" | "abort" => {
            if parts.len() < 2 {
                return CommandResult::Error(format!("Usage: {} <transaction-id>", parts[0]));
            }
            let result = if parts[0] == "commit" {
                conn.commit(parts[1])
            } else {
                conn.abort(parts[1])
            };
            match result {
                Ok(()) => CommandResult::Ok,
                Err(e) => CommandResult::Error(format!("{} error: {}", parts[0], e)),
            }
        }

        "status" => CommandResult::Info(format!(
            "state: {:?}, version: {}, subscriptions: [{}], transactions: [{}]",
            conn.state(),
            conn.version().map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
            conn.subscription_ids().join(", "),
            conn.open_transactions().join(", "),
        )),

        "help" | "?" => {
            print_help();
            CommandResult::Ok
        }

        _ => CommandResult::Error(format!(
            "Unknown command: {}. Type 'help' for commands.",
            parts[0]
        )),
    }
}

/// Subscribe to `dest`, printing every message received. Returns the
/// subscription id.
pub fn subscribe_destination(conn: &Connection, dest: &str) -> Result<String, String> {
    let label = dest.to_string();
    conn.subscribe(dest, Headers::new(), move |message: Message| {
        print_frame(&format!("[{}] MESSAGE received:", label), message.frame());
    })
    .map(|sub| sub.id().to_string())
    .map_err(|e| format!("Failed to subscribe to '{}': {}", dest, e))
}

/// Print a frame's headers and body followed by a fresh prompt.
pub fn print_frame(title: &str, frame: &Frame) {
    println!("\n{}", title);
    for (k, v) in frame.headers.iter() {
        println!("  {}: {}", k, v);
    }
    if !frame.body.is_empty() {
        match std::str::from_utf8(&frame.body) {
            Ok(s) => println!("  Body: {}", s),
            Err(_) => println!("  Body: ({} bytes, binary)", frame.body.len()),
        }
    }
    print!("> ");
    let _ = io::stdout().flush();
}

/// Print help text
pub fn print_help() {
    println!("Commands:");
    println!("  send <destination> <message>  - Send a message");
    println!("  sub <destination>             - Subscribe to a destination");
    println!("  unsub <subscription-id>       - Cancel a subscription");
    println!("  begin [transaction-id]        - Begin a transaction");
    println!("  commit <transaction-id>       - Commit a transaction");
    println!("  abort <transaction-id>        - Abort a transaction");
    println!("  status                        - Show connection state");
    println!("  quit                          - Disconnect and exit");
}
