//! Per-ticket serialization and cancellation handles

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::ticket::TicketId;

/// One async mutex per ticket; held for the duration of an `advance`.
#[derive(Default)]
pub(crate) struct TicketLocks {
    inner: Mutex<HashMap<TicketId, Arc<tokio::sync::Mutex<()>>>>,
}

impl TicketLocks {
    pub(crate) fn lock_for(&self, ticket_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        // A poisoned map only means another thread panicked mid-insert; the
        // entries themselves are still usable.
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(ticket_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop the entry for a ticket that reached a terminal phase. Holders of
    /// the old handle only ever observe the terminal ticket.
    pub(crate) fn remove(&self, ticket_id: &str) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(ticket_id);
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Live cancellation tokens, one per non-terminal ticket.
#[derive(Default)]
pub(crate) struct CancelRegistry {
    inner: Mutex<HashMap<TicketId, CancellationToken>>,
}

impl CancelRegistry {
    pub(crate) fn token_for(&self, ticket_id: &str) -> CancellationToken {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(ticket_id.to_string()).or_default().clone()
    }

    pub(crate) fn cancel(&self, ticket_id: &str) {
        self.token_for(ticket_id).cancel();
    }

    pub(crate) fn remove(&self, ticket_id: &str) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(ticket_id);
    }
}
