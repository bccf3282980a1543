//! SQLite-backed key-value storage for pages
//!
//! Other processes may write the same database. The store keeps a snapshot
//! of the table so [`SqliteStore::reconcile`] can work out which keys changed
//! underneath it; its own writes update the snapshot directly and notify
//! immediately.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use hostbridge_core::{CapabilityError, KeyValueStore};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::broadcast;
use tracing::debug;

use crate::migration_runner::run_migrations;

const CHANGE_CAPACITY: usize = 256;

struct Inner {
    conn: Connection,
    snapshot: HashMap<String, String>,
}

pub struct SqliteStore {
    inner: Mutex<Inner>,
    changes: broadcast::Sender<String>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let mut conn = Connection::open(path)?;
        run_migrations(&mut conn)?;
        let snapshot = read_all(&conn)?;
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Ok(Self {
            inner: Mutex::new(Inner { conn, snapshot }),
            changes,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, key: &str) {
        // No receivers just means no bridge is listening yet.
        let _ = self.changes.send(key.to_string());
    }

    /// Re-read the table and notify every key whose value differs from the
    /// last known state. Returns the changed keys.
    pub fn reconcile(&self) -> anyhow::Result<Vec<String>> {
        let changed = {
            let mut inner = self.lock();
            let current = read_all(&inner.conn)?;
            let changed = diff(&inner.snapshot, &current);
            inner.snapshot = current;
            changed
        };

        if !changed.is_empty() {
            debug!(
                component = "storage",
                event = "storage.external_change",
                keys = changed.len(),
                "Storage changed outside this process"
            );
        }
        for key in &changed {
            self.notify(key);
        }
        Ok(changed)
    }
}

fn read_all(conn: &Connection) -> rusqlite::Result<HashMap<String, String>> {
    let mut stmt = conn.prepare("SELECT key, value FROM kv")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

/// Keys added, removed or modified between two snapshots, sorted.
fn diff(before: &HashMap<String, String>, after: &HashMap<String, String>) -> Vec<String> {
    let mut changed: Vec<String> = after
        .iter()
        .filter(|(key, value)| before.get(*key) != Some(*value))
        .map(|(key, _)| key.clone())
        .chain(
            before
                .keys()
                .filter(|key| !after.contains_key(*key))
                .cloned(),
        )
        .collect();
    changed.sort();
    changed
}

fn storage_error(err: rusqlite::Error) -> CapabilityError {
    CapabilityError::Failed(format!("storage: {err}"))
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, CapabilityError> {
        self.lock()
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(storage_error)
    }

    fn put(&self, key: &str, value: &str) -> Result<(), CapabilityError> {
        {
            let mut inner = self.lock();
            inner
                .conn
                .execute(
                    "INSERT INTO kv (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![key, value],
                )
                .map_err(storage_error)?;
            inner.snapshot.insert(key.to_string(), value.to_string());
        }
        self.notify(key);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CapabilityError> {
        {
            let mut inner = self.lock();
            inner
                .conn
                .execute("DELETE FROM kv WHERE key = ?1", params![key])
                .map_err(storage_error)?;
            inner.snapshot.remove(key);
        }
        self.notify(key);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(dir: &tempfile::TempDir) -> SqliteStore {
        SqliteStore::open(&dir.path().join("storage.db")).unwrap()
    }

    #[test]
    fn put_get_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(&tmp);

        assert_eq!(store.get("theme").unwrap(), None);
        store.put("theme", "\"dark\"").unwrap();
        assert_eq!(store.get("theme").unwrap().as_deref(), Some("\"dark\""));
        store.put("theme", "\"light\"").unwrap();
        assert_eq!(store.get("theme").unwrap().as_deref(), Some("\"light\""));
        store.delete("theme").unwrap();
        assert_eq!(store.get("theme").unwrap(), None);
    }

    #[test]
    fn own_writes_notify_once() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(&tmp);
        let mut changes = store.subscribe();

        store.put("a", "1").unwrap();
        assert_eq!(changes.try_recv().unwrap(), "a");

        // Already in the snapshot, so reconciling finds nothing new.
        assert!(store.reconcile().unwrap().is_empty());
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn reconcile_reports_writes_from_another_connection() {
        let tmp = tempfile::tempdir().unwrap();
        let ours = open(&tmp);
        let theirs = open(&tmp);
        ours.put("kept", "1").unwrap();
        ours.put("dropped", "1").unwrap();
        ours.reconcile().unwrap();
        let mut changes = ours.subscribe();

        theirs.put("added", "2").unwrap();
        theirs.put("kept", "3").unwrap();
        theirs.delete("dropped").unwrap();

        assert_eq!(ours.reconcile().unwrap(), vec!["added", "dropped", "kept"]);
        assert_eq!(changes.try_recv().unwrap(), "added");
        assert_eq!(changes.try_recv().unwrap(), "dropped");
        assert_eq!(changes.try_recv().unwrap(), "kept");
        assert_eq!(ours.get("kept").unwrap().as_deref(), Some("3"));
    }

    #[test]
    fn values_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        open(&tmp).put("k", "{\"n\":1}").unwrap();
        assert_eq!(open(&tmp).get("k").unwrap().as_deref(), Some("{\"n\":1}"));
    }
}
