//! Durable ticket persistence with optimistic concurrency
//!
//! Every backend enforces the same contract: a save must carry exactly
//! `stored revision + 1` (1 for a ticket that has never been saved),
//! otherwise it fails with [`StoreError::StaleTicket`] and the stored
//! document is left untouched.
//!
//! # Backends
//!
//! - [`MemoryTicketStore`]: in-process, for tests and embedding
//! - [`FileTicketStore`]: one JSON document per ticket, atomic rename
//! - `RocksTicketStore` (feature `heavy-state`): RocksDB column family

pub mod file;
pub mod memory;
#[cfg(feature = "heavy-state")]
pub mod rocks;
pub mod schema;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ticket::{Phase, Severity, Ticket};

pub use file::FileTicketStore;
pub use memory::MemoryTicketStore;
#[cfg(feature = "heavy-state")]
pub use rocks::RocksTicketStore;

/// Error type for ticket store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("stale ticket {id}: expected revision {expected}, got {found}")]
    StaleTicket { id: String, expected: u64, found: u64 },

    #[error("ticket not found: {0}")]
    NotFound(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[cfg(feature = "heavy-state")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[cfg(feature = "heavy-state")]
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),
}

/// Result type for ticket store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence seam used by the orchestrator
pub trait TicketStore: Send + Sync {
    /// Persist `ticket` if its revision is exactly one past the stored one.
    fn save(&self, ticket: &Ticket) -> StoreResult<()>;

    fn load(&self, id: &str) -> StoreResult<Ticket>;

    /// Tickets matching `filter`, oldest first.
    fn list(&self, filter: &TicketFilter) -> StoreResult<Vec<Ticket>>;
}

/// Shared reference to a ticket store
pub type SharedTicketStore = Arc<dyn TicketStore>;

/// Revision gate shared by all backends.
pub(crate) fn check_revision(id: &str, stored: Option<u64>, incoming: u64) -> StoreResult<()> {
    let expected = stored.unwrap_or(0) + 1;
    if incoming == expected {
        Ok(())
    } else {
        Err(StoreError::StaleTicket {
            id: id.to_string(),
            expected,
            found: incoming,
        })
    }
}

pub(crate) fn sort_for_listing(tickets: &mut [Ticket]) {
    tickets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

/// Selection criteria for [`TicketStore::list`]. Empty matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketFilter {
    /// Only these phases
    #[serde(default)]
    pub phases: Vec<Phase>,
    /// `Some(true)` for terminal only, `Some(false)` for live only
    #[serde(default)]
    pub terminal: Option<bool>,
    /// Minimum finding severity
    #[serde(default)]
    pub min_severity: Option<Severity>,
    #[serde(default)]
    pub created_after: Option<DateTime<Utc>>,
}

impl TicketFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Non-terminal tickets, used for crash recovery.
    pub fn live() -> Self {
        Self {
            terminal: Some(false),
            ..Self::default()
        }
    }

    pub fn with_phases(mut self, phases: impl IntoIterator<Item = Phase>) -> Self {
        self.phases = phases.into_iter().collect();
        self
    }

    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    pub fn created_after(mut self, at: DateTime<Utc>) -> Self {
        self.created_after = Some(at);
        self
    }

    pub fn matches(&self, ticket: &Ticket) -> bool {
        if !self.phases.is_empty() && !self.phases.contains(&ticket.phase) {
            return false;
        }
        if let Some(terminal) = self.terminal {
            if ticket.is_terminal() != terminal {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if ticket.finding.severity < min {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if ticket.created_at <= after {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::ticket::{CodeLocation, Finding, Severity, Ticket};

    pub fn ticket(severity: Severity) -> Ticket {
        Ticket::new(Finding {
            location: CodeLocation::new("src/main.c", 7),
            category: "format-string".into(),
            severity,
            description: "printf with user-controlled format".into(),
            cwe: Some("CWE-134".into()),
            code_snippet: None,
            tool: None,
        })
    }

    /// Save the next revision of `ticket` the way the orchestrator does.
    pub fn commit(store: &dyn super::TicketStore, ticket: &mut Ticket) -> super::StoreResult<()> {
        ticket.revision += 1;
        store.save(ticket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_revision() {
        assert!(check_revision("t", None, 1).is_ok());
        assert!(check_revision("t", Some(4), 5).is_ok());
        match check_revision("t", Some(5), 5) {
            Err(StoreError::StaleTicket { expected, found, .. }) => {
                assert_eq!(expected, 6);
                assert_eq!(found, 5);
            }
            other => panic!("expected stale, got {other:?}"),
        }
    }

    #[test]
    fn test_filter_matches() {
        let mut live = testing::ticket(Severity::High);
        live.phase = Phase::FixProposed;
        let mut done = testing::ticket(Severity::Low);
        done.phase = Phase::Resolved;

        assert!(TicketFilter::live().matches(&live));
        assert!(!TicketFilter::live().matches(&done));
        assert!(TicketFilter::all()
            .with_phases([Phase::Resolved])
            .matches(&done));
        assert!(!TicketFilter::all()
            .with_min_severity(Severity::Medium)
            .matches(&done));
        assert!(!TicketFilter::all()
            .created_after(live.created_at)
            .matches(&live));
    }
}
