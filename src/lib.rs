//! A STOMP client that runs over any ordered, message-oriented transport.
//!
//! The crate is split the way the protocol is:
//! - [`codec`] turns frames into wire bytes and back, reassembling frames
//!   fragmented across transport messages;
//! - [`Connection`] drives the handshake, heartbeats, subscriptions,
//!   transactions and acknowledgements;
//! - [`transport`] and [`scheduler`] are the seams where the caller plugs
//!   in the byte channel and the timer facility. A tokio TCP binding and a
//!   tokio scheduler are included.
//!
//! ```ignore
//! use stomp_over::{Callbacks, Config, Headers};
//!
//! let conn = stomp_over::transport::tcp::connect("127.0.0.1:61613", Config::default()).await?;
//! conn.connect(
//!     Headers::new().with("host", "/").with("login", "guest").with("passcode", "guest"),
//!     Callbacks::new(|frame| println!("connected: {:?}", frame.get_header("version")))
//!         .on_error(|err| eprintln!("{}", err)),
//! )?;
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod events;
pub mod frame;
pub mod headers;
pub mod heartbeat;
pub mod scheduler;
pub mod subscription;
pub mod transaction;
pub mod transport;

pub use codec::{CodecError, Escaping, StompCodec, Unmarshalled, marshal, unmarshal, unmarshal_one};
pub use config::Config;
pub use connection::{ConnError, Connection, State};
pub use events::{Callbacks, ErrorEvent, EventSink};
pub use frame::{Command, Frame, Version};
pub use headers::Headers;
pub use heartbeat::{HeartbeatConfig, negotiate_heartbeats, parse_heartbeat_header};
pub use scheduler::{Scheduler, Task, TimerId, TokioScheduler};
pub use subscription::{Message, Subscription};
pub use transaction::Transaction;
pub use transport::Transport;
