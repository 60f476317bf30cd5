//! RocksDB-backed ticket store
//!
//! Tickets live in the `tickets` column family as JSON documents so that
//! fields added later deserialize with defaults. The revision check runs
//! under the write half of the lock.

use std::path::PathBuf;
use std::sync::RwLock;

use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, DB};
use serde::Deserialize;

use super::schema::{keys, ALL_CFS, CF_TICKETS};
use super::{check_revision, sort_for_listing, StoreError, StoreResult, TicketFilter, TicketStore};
use crate::ticket::Ticket;

#[derive(Deserialize)]
struct RevisionHeader {
    revision: u64,
}

pub struct RocksTicketStore {
    db: RwLock<DB>,
    path: PathBuf,
}

impl RocksTicketStore {
    /// Open or create a store at the given path
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;

        Ok(Self {
            db: RwLock::new(db),
            path,
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl TicketStore for RocksTicketStore {
    fn save(&self, ticket: &Ticket) -> StoreResult<()> {
        let db = self.db.write().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(CF_TICKETS)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(CF_TICKETS.to_string()))?;
        let key = keys::ticket(&ticket.id);

        let stored = match db.get_cf(&cf, key.as_bytes())? {
            Some(bytes) => Some(
                serde_json::from_slice::<RevisionHeader>(&bytes)
                    .map_err(|e| StoreError::Deserialization(e.to_string()))?
                    .revision,
            ),
            None => None,
        };
        check_revision(&ticket.id, stored, ticket.revision)?;

        let bytes =
            serde_json::to_vec(ticket).map_err(|e| StoreError::Serialization(e.to_string()))?;
        db.put_cf(&cf, key.as_bytes(), bytes)?;
        Ok(())
    }

    fn load(&self, id: &str) -> StoreResult<Ticket> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(CF_TICKETS)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(CF_TICKETS.to_string()))?;

        let bytes = db
            .get_cf(&cf, keys::ticket(id).as_bytes())?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Deserialization(e.to_string()))
    }

    fn list(&self, filter: &TicketFilter) -> StoreResult<Vec<Ticket>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(CF_TICKETS)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(CF_TICKETS.to_string()))?;

        let mut tickets = Vec::new();
        for item in db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, value) = item?;
            if !key.starts_with(keys::TICKET_PREFIX.as_bytes()) {
                continue;
            }
            let ticket: Ticket = serde_json::from_slice(&value)
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            if filter.matches(&ticket) {
                tickets.push(ticket);
            }
        }
        sort_for_listing(&mut tickets);
        Ok(tickets)
    }
}
