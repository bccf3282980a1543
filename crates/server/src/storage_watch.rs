//! Detects storage writes made by other processes.
//!
//! Watches the database directory and, after a short quiet period, asks the
//! store to reconcile its snapshot against the table.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::storage::SqliteStore;

const DEBOUNCE_MS: u64 = 150;

/// Keeps the filesystem watcher and its reconcile task alive.
pub struct StorageWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for StorageWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Whether `path` is the database file or one of its journal siblings.
fn touches_database(path: &Path, db_name: &OsString) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    name.to_string_lossy()
        .starts_with(db_name.to_string_lossy().as_ref())
}

fn matches_supported_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

pub fn start_storage_watcher(
    store: Arc<SqliteStore>,
    db_path: &Path,
) -> anyhow::Result<StorageWatcher> {
    let dir: PathBuf = db_path
        .parent()
        .map(Path::to_path_buf)
        .context("database path has no parent directory")?;
    let db_name = db_path
        .file_name()
        .map(|name| name.to_os_string())
        .context("database path has no file name")?;

    let (tx, mut rx) = mpsc::unbounded_channel::<()>();

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                if !matches_supported_event_kind(&event.kind) {
                    return;
                }
                if event
                    .paths
                    .iter()
                    .any(|path| touches_database(path, &db_name))
                {
                    let _ = tx.send(());
                }
            }
            Err(err) => {
                warn!(
                    component = "storage_watch",
                    event = "storage_watch.fs_event_error",
                    error = %err,
                    "Storage watcher event error"
                );
            }
        },
        notify::Config::default(),
    )?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;

    info!(
        component = "storage_watch",
        event = "storage_watch.started",
        path = %dir.display(),
        "Storage watcher started"
    );

    let task = tokio::spawn(async move {
        while rx.recv().await.is_some() {
            // Coalesce the burst of events a single transaction produces.
            tokio::time::sleep(Duration::from_millis(DEBOUNCE_MS)).await;
            while rx.try_recv().is_ok() {}

            let store = store.clone();
            match tokio::task::spawn_blocking(move || store.reconcile()).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!(
                    component = "storage_watch",
                    event = "storage_watch.reconcile_failed",
                    error = %err,
                    "Failed to reconcile storage"
                ),
                Err(err) => warn!(
                    component = "storage_watch",
                    event = "storage_watch.reconcile_panicked",
                    error = %err,
                    "Storage reconcile task failed"
                ),
            }
        }
    });

    Ok(StorageWatcher {
        _watcher: watcher,
        task,
    })
}
