use crate::connection::ConnectionEvent;
use std::collections::HashMap;
use system::{ConnectionId, SessionEvent};
use tokio::sync::mpsc::error::TrySendError;

pub type ConnectionTx = tokio::sync::mpsc::Sender<ConnectionEvent>;

/// Egress channels of connections, keyed by id.
pub struct ConnectionTxStorage {
    connection_txs: HashMap<ConnectionId, ConnectionTx>,
}

impl ConnectionTxStorage {
    pub fn new() -> Self {
        Self {
            connection_txs: HashMap::new(),
        }
    }

    pub fn insert(&mut self, connection_id: ConnectionId, tx: ConnectionTx) {
        self.connection_txs.insert(connection_id, tx);
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<&ConnectionTx> {
        self.connection_txs.get(connection_id)
    }

    /// Fire-and-forget: a full or closed queue loses this message only.
    pub fn send(&self, to: &ConnectionId, message: ConnectionEvent) {
        if let Err(e) = self.deliver(to, message) {
            log::warn!("Dropped an event for connection {}: {}", to, e);
        }
    }

    pub fn send_event(&self, to: &ConnectionId, event: SessionEvent) {
        self.send(to, ConnectionEvent::SessionEvent(event))
    }

    /// Sends `event` to every stored connection except `without`, dropping it
    /// for connections whose queue is full.
    pub fn broadcast(&self, event: &SessionEvent, without: Option<&ConnectionId>) {
        for connection_id in self.connection_txs.keys() {
            if without != Some(connection_id) {
                self.send_event(connection_id, event.clone());
            }
        }
    }

    /// Sends an event the receiver can't do without. Returns `false` when the
    /// connection's queue is full; such a connection is out of sync for good.
    pub fn publish_to(&self, to: &ConnectionId, event: SessionEvent) -> bool {
        match self.deliver(to, ConnectionEvent::SessionEvent(event)) {
            Err(Undelivered::Full) => false,
            Err(e) => {
                log::debug!("Connection {} missed an event: {}", to, e);
                true
            }
            Ok(()) => true,
        }
    }

    /// Like `broadcast`, but returns the connections that could not take the
    /// event.
    pub fn publish(
        &self,
        event: &SessionEvent,
        without: Option<&ConnectionId>,
    ) -> Vec<ConnectionId> {
        self.connection_txs
            .keys()
            .filter(|connection_id| without != Some(*connection_id))
            .filter(|connection_id| !self.publish_to(connection_id, event.clone()))
            .cloned()
            .collect()
    }

    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<ConnectionTx> {
        self.connection_txs.remove(connection_id)
    }

    fn deliver(&self, to: &ConnectionId, message: ConnectionEvent) -> Result<(), Undelivered> {
        let tx = self.connection_txs.get(to).ok_or(Undelivered::Unknown)?;
        tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => Undelivered::Full,
            TrySendError::Closed(_) => Undelivered::Closed,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Undelivered {
    Full,
    Closed,
    Unknown,
}

impl std::fmt::Display for Undelivered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Undelivered::Full => write!(f, "egress queue is full"),
            Undelivered::Closed => write!(f, "connection is already closed"),
            Undelivered::Unknown => write!(f, "no egress channel"),
        }
    }
}
