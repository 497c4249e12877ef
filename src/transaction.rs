use crate::connection::{ConnError, Connection};

/// Tracks transaction ids begun on a connection.
///
/// Transactions live on the broker; this only mints ids and remembers which
/// ones were begun and not yet committed or aborted. Nothing here gates
/// sending a frame.
#[derive(Debug, Default)]
pub(crate) struct TransactionRegistry {
    open: Vec<String>,
}

impl TransactionRegistry {
    /// Use the caller's id when it is non-empty, otherwise mint
    /// `tx-<counter>` and advance the shared counter.
    pub(crate) fn resolve_id(explicit: Option<&str>, counter: &mut u64) -> String {
        match explicit.filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => {
                let id = format!("tx-{}", *counter);
                *counter += 1;
                id
            }
        }
    }

    pub(crate) fn begin(&mut self, id: &str) {
        if !self.open.iter().any(|t| t == id) {
            self.open.push(id.to_string());
        }
    }

    pub(crate) fn finish(&mut self, id: &str) {
        self.open.retain(|t| t != id);
    }

    pub(crate) fn open(&self) -> Vec<String> {
        self.open.clone()
    }

    pub(crate) fn clear(&mut self) {
        self.open.clear();
    }
}

/// Handle returned from [`Connection::begin`].
#[derive(Clone)]
pub struct Transaction {
    id: String,
    conn: Connection,
}

impl Transaction {
    pub(crate) fn new(id: String, conn: Connection) -> Self {
        Self { id, conn }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Send COMMIT for this transaction.
    pub fn commit(&self) -> Result<(), ConnError> {
        self.conn.commit(&self.id)
    }

    /// Send ABORT for this transaction.
    pub fn abort(&self) -> Result<(), ConnError> {
        self.conn.abort(&self.id)
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction").field("id", &self.id).finish()
    }
}
