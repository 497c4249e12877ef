use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use crate::connection::{ConnError, Connection};
use crate::frame::Frame;
use crate::headers::{Headers, names};

/// Callback invoked for every MESSAGE delivered to a subscription.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Internal subscription entry stored for each subscription id.
#[derive(Clone)]
pub(crate) struct SubscriptionEntry {
    pub(crate) destination: String,
    pub(crate) handler: MessageHandler,
}

/// Map of subscription id to consumer callback.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    entries: HashMap<String, SubscriptionEntry>,
}

impl SubscriptionRegistry {
    /// Use the caller's id when it is non-empty, otherwise mint
    /// `sub-<counter>` and advance the shared counter.
    pub(crate) fn resolve_id(explicit: Option<&str>, counter: &mut u64) -> String {
        match explicit.filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => {
                let id = format!("sub-{}", *counter);
                *counter += 1;
                id
            }
        }
    }

    pub(crate) fn insert(&mut self, id: String, destination: String, handler: MessageHandler) {
        self.entries.insert(
            id,
            SubscriptionEntry {
                destination,
                handler,
            },
        );
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<SubscriptionEntry> {
        self.entries.remove(id)
    }

    pub(crate) fn handler(&self, id: &str) -> Option<MessageHandler> {
        self.entries.get(id).map(|e| e.handler.clone())
    }

    pub(crate) fn destination(&self, id: &str) -> Option<&str> {
        self.entries.get(id).map(|e| e.destination.as_str())
    }

    pub(crate) fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Handle returned from [`Connection::subscribe`].
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Clone)]
pub struct Subscription {
    id: String,
    destination: String,
    conn: Connection,
}

impl Subscription {
    pub(crate) fn new(id: String, destination: String, conn: Connection) -> Self {
        Self {
            id,
            destination,
            conn,
        }
    }

    /// Returns the subscription id sent in the SUBSCRIBE frame.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the destination this subscription listens to.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Remove the local callback and send UNSUBSCRIBE for this id.
    pub fn unsubscribe(&self) -> Result<(), ConnError> {
        self.conn.unsubscribe(&self.id)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .finish()
    }
}

/// A MESSAGE frame delivered to a subscriber, with acknowledgement helpers
/// bound to its `message-id` and `subscription`.
///
/// Derefs to the underlying [`Frame`].
#[derive(Clone)]
pub struct Message {
    frame: Frame,
    message_id: String,
    subscription: String,
    ack_id: Option<String>,
    conn: Connection,
}

impl Message {
    pub(crate) fn new(frame: Frame, conn: Connection) -> Self {
        let message_id = frame
            .get_header(names::MESSAGE_ID)
            .unwrap_or_default()
            .to_string();
        let subscription = frame
            .get_header(names::SUBSCRIPTION)
            .unwrap_or_default()
            .to_string();
        let ack_id = frame.get_header(names::ACK).map(str::to_string);
        Self {
            frame,
            message_id,
            subscription,
            ack_id,
            conn,
        }
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn into_frame(self) -> Frame {
        self.frame
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    /// Send ACK for this message. `headers` may carry extras such as
    /// `transaction`.
    pub fn ack(&self, headers: Headers) -> Result<(), ConnError> {
        self.conn
            .ack(&self.message_id, &self.subscription, self.with_ack_id(headers))
    }

    /// Send NACK for this message.
    pub fn nack(&self, headers: Headers) -> Result<(), ConnError> {
        self.conn
            .nack(&self.message_id, &self.subscription, self.with_ack_id(headers))
    }

    // STOMP 1.2 brokers identify the message to acknowledge by the MESSAGE's
    // `ack` header, sent back as `id`.
    fn with_ack_id(&self, mut headers: Headers) -> Headers {
        if let Some(ack_id) = &self.ack_id {
            headers.set_if_absent(names::ID, ack_id.clone());
        }
        headers
    }
}

impl Deref for Message {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        &self.frame
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("message_id", &self.message_id)
            .field("subscription", &self.subscription)
            .field("frame", &self.frame)
            .finish()
    }
}
