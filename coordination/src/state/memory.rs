//! In-process ticket store

use std::collections::HashMap;
use std::sync::Mutex;

use super::{check_revision, sort_for_listing, StoreError, StoreResult, TicketFilter, TicketStore};
use crate::ticket::Ticket;

/// Volatile store backed by a mutex-guarded map
#[derive(Debug, Default)]
pub struct MemoryTicketStore {
    tickets: Mutex<HashMap<String, Ticket>>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TicketStore for MemoryTicketStore {
    fn save(&self, ticket: &Ticket) -> StoreResult<()> {
        let mut tickets = self.tickets.lock().map_err(|_| StoreError::LockPoisoned)?;
        let stored = tickets.get(&ticket.id).map(|t| t.revision);
        check_revision(&ticket.id, stored, ticket.revision)?;
        tickets.insert(ticket.id.clone(), ticket.clone());
        Ok(())
    }

    fn load(&self, id: &str) -> StoreResult<Ticket> {
        let tickets = self.tickets.lock().map_err(|_| StoreError::LockPoisoned)?;
        tickets
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn list(&self, filter: &TicketFilter) -> StoreResult<Vec<Ticket>> {
        let tickets = self.tickets.lock().map_err(|_| StoreError::LockPoisoned)?;
        let mut matching: Vec<Ticket> = tickets
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        sort_for_listing(&mut matching);
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing;
    use crate::ticket::{Phase, Severity};

    #[test]
    fn test_save_and_load() {
        let store = MemoryTicketStore::new();
        let mut ticket = testing::ticket(Severity::High);
        testing::commit(&store, &mut ticket).unwrap();

        let loaded = store.load(&ticket.id).unwrap();
        assert_eq!(loaded.revision, 1);
        assert!(matches!(store.load("missing"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_stale_save_leaves_value_intact() {
        let store = MemoryTicketStore::new();
        let mut ticket = testing::ticket(Severity::High);
        testing::commit(&store, &mut ticket).unwrap();

        let mut winner = ticket.clone();
        winner.phase = Phase::PocPending;
        testing::commit(&store, &mut winner).unwrap();

        let mut loser = ticket.clone();
        loser.phase = Phase::Abandoned;
        let err = testing::commit(&store, &mut loser).unwrap_err();
        assert!(matches!(err, StoreError::StaleTicket { expected: 3, found: 2, .. }));

        let stored = store.load(&ticket.id).unwrap();
        assert_eq!(stored.phase, Phase::PocPending);
        assert_eq!(stored.revision, 2);
    }

    #[test]
    fn test_new_ticket_must_start_at_revision_one() {
        let store = MemoryTicketStore::new();
        let ticket = testing::ticket(Severity::Low);
        assert!(matches!(
            store.save(&ticket),
            Err(StoreError::StaleTicket { expected: 1, found: 0, .. })
        ));
    }

    #[test]
    fn test_list_filters_and_orders() {
        let store = MemoryTicketStore::new();
        let mut first = testing::ticket(Severity::Critical);
        let mut second = testing::ticket(Severity::Low);
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        second.phase = Phase::Resolved;
        testing::commit(&store, &mut second).unwrap();
        testing::commit(&store, &mut first).unwrap();

        let all = store.list(&TicketFilter::all()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, first.id);

        let live = store.list(&TicketFilter::live()).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, first.id);
    }
}
