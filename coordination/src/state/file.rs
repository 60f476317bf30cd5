//! Directory-backed ticket store
//!
//! One `<id>.json` document per ticket. Writes go to a temp file in the
//! same directory and are renamed into place, so readers never observe a
//! torn document. The revision check and the rename happen under a mutex
//! shared by every store in the process that is open on the same directory.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use serde::Deserialize;
use tracing::{debug, warn};

use super::{check_revision, sort_for_listing, StoreError, StoreResult, TicketFilter, TicketStore};
use crate::ticket::types::sanitize_component;
use crate::ticket::Ticket;

const EXTENSION: &str = "json";

/// Only the revision is needed to run the CAS check.
#[derive(Deserialize)]
struct RevisionHeader {
    revision: u64,
}

/// One write lock per canonical store directory.
fn directory_lock(root: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let mut locks = LOCKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    locks.entry(root.to_path_buf()).or_default().clone()
}

#[derive(Debug)]
pub struct FileTicketStore {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileTicketStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        let canonical = fs::canonicalize(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            write_lock: directory_lock(&canonical),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root
            .join(format!("{}.{EXTENSION}", sanitize_component(id)))
    }

    fn read(&self, path: &Path) -> StoreResult<Option<String>> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> StoreResult<()> {
        let tmp = self
            .root
            .join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        let io_err = |source| StoreError::Io {
            path: tmp.clone(),
            source,
        };
        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);
        if let Err(source) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
        Ok(())
    }
}

impl TicketStore for FileTicketStore {
    fn save(&self, ticket: &Ticket) -> StoreResult<()> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::LockPoisoned)?;
        let path = self.path_for(&ticket.id);

        let stored = match self.read(&path)? {
            Some(text) => Some(
                serde_json::from_str::<RevisionHeader>(&text)
                    .map_err(|e| StoreError::Deserialization(e.to_string()))?
                    .revision,
            ),
            None => None,
        };
        check_revision(&ticket.id, stored, ticket.revision)?;

        let bytes = serde_json::to_vec_pretty(ticket)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.write_atomic(&path, &bytes)?;
        debug!(ticket_id = %ticket.id, revision = ticket.revision, "ticket saved");
        Ok(())
    }

    fn load(&self, id: &str) -> StoreResult<Ticket> {
        let text = self
            .read(&self.path_for(id))?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        serde_json::from_str(&text).map_err(|e| StoreError::Deserialization(e.to_string()))
    }

    fn list(&self, filter: &TicketFilter) -> StoreResult<Vec<Ticket>> {
        let entries = fs::read_dir(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })?;

        let mut tickets = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(text) = self.read(&path)? else {
                continue;
            };
            match serde_json::from_str::<Ticket>(&text) {
                Ok(ticket) if filter.matches(&ticket) => tickets.push(ticket),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable ticket"),
            }
        }
        sort_for_listing(&mut tickets);
        Ok(tickets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing;
    use crate::ticket::{Phase, Severity};
    use tempfile::tempdir;

    #[test]
    fn test_round_trip_through_disk() {
        let dir = tempdir().unwrap();
        let store = FileTicketStore::open(dir.path()).unwrap();
        let mut ticket = testing::ticket(Severity::Critical);
        testing::commit(&store, &mut ticket).unwrap();

        let reopened = FileTicketStore::open(dir.path()).unwrap();
        let loaded = reopened.load(&ticket.id).unwrap();
        assert_eq!(loaded.id, ticket.id);
        assert_eq!(loaded.finding.cwe.as_deref(), Some("CWE-134"));
    }

    #[test]
    fn test_stale_save_keeps_concurrent_value() {
        let dir = tempdir().unwrap();
        let store = FileTicketStore::open(dir.path()).unwrap();
        let mut ticket = testing::ticket(Severity::High);
        testing::commit(&store, &mut ticket).unwrap();

        let mut a = ticket.clone();
        a.phase = Phase::PocPending;
        testing::commit(&store, &mut a).unwrap();

        let mut b = ticket.clone();
        b.phase = Phase::Abandoned;
        assert!(matches!(
            testing::commit(&store, &mut b),
            Err(StoreError::StaleTicket { .. })
        ));
        assert_eq!(store.load(&ticket.id).unwrap().phase, Phase::PocPending);
    }

    #[test]
    fn test_list_skips_temp_and_corrupt_files() {
        let dir = tempdir().unwrap();
        let store = FileTicketStore::open(dir.path()).unwrap();
        let mut ticket = testing::ticket(Severity::Medium);
        testing::commit(&store, &mut ticket).unwrap();
        fs::write(dir.path().join("garbage.json"), "{not json").unwrap();
        fs::write(dir.path().join(".leftover.tmp"), "{}").unwrap();

        let listed = store.list(&TicketFilter::all()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, ticket.id);
    }

    #[test]
    fn test_stores_on_same_directory_share_write_lock() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let a = FileTicketStore::open(dir.path()).unwrap();
        let b = FileTicketStore::open(dir.path().join("sub").join("..")).unwrap();
        let other = tempdir().unwrap();
        let c = FileTicketStore::open(other.path()).unwrap();
        assert!(Arc::ptr_eq(&a.write_lock, &b.write_lock));
        assert!(!Arc::ptr_eq(&a.write_lock, &c.write_lock));

        let mut ticket = testing::ticket(Severity::High);
        testing::commit(&a, &mut ticket).unwrap();
        let racers: Vec<_> = (0..8)
            .map(|i| {
                let store = if i % 2 == 0 {
                    FileTicketStore::open(dir.path()).unwrap()
                } else {
                    FileTicketStore::open(dir.path().join("sub").join("..")).unwrap()
                };
                let mut next = ticket.clone();
                std::thread::spawn(move || testing::commit(&store, &mut next).is_ok())
            })
            .collect();
        let winners = racers
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(b.load(&ticket.id).unwrap().revision, 2);
    }

    #[test]
    fn test_missing_ticket() {
        let dir = tempdir().unwrap();
        let store = FileTicketStore::open(dir.path()).unwrap();
        assert!(matches!(store.load("nope"), Err(StoreError::NotFound(_))));
    }
}
