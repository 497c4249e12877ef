//! Transport seam.
//!
//! A transport is any ordered, message-oriented channel (a WebSocket, a TCP
//! stream, an in-process pipe). The connection only needs to push bytes and
//! to close it; the binding reports the other direction by calling
//! [`Connection::handle_open`](crate::Connection::handle_open),
//! [`Connection::handle_message`](crate::Connection::handle_message) and
//! [`Connection::handle_close`](crate::Connection::handle_close).

use bytes::Bytes;
use std::io;

pub mod tcp;

pub trait Transport: Send + Sync + 'static {
    /// Queue `data` as one transport message. Must not block.
    fn send(&self, data: Bytes) -> io::Result<()>;

    /// Close the transport. The binding reports the close back through
    /// `Connection::handle_close` once it has happened.
    fn close(&self);
}
