//! Lightweight migration runner for rusqlite.
//!
//! Numbered SQL files from the workspace `migrations/` directory are compiled
//! into the binary. Applied versions are tracked in `schema_versions` and any
//! pending ones run in order when a store opens.

use std::collections::HashSet;

use anyhow::Context;
use rusqlite::{params, Connection};
use tracing::{debug, info};

const MIGRATIONS: &[(&str, &str)] = &[(
    "001_storage",
    include_str!("../../../migrations/001_storage.sql"),
)];

/// Run all pending migrations against the given connection.
pub fn run_migrations(conn: &mut Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_versions (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )",
    )?;

    let mut files: Vec<(i64, &str, &str)> = MIGRATIONS
        .iter()
        .filter_map(|(name, sql)| parse_version(name).map(|version| (version, *name, *sql)))
        .collect();
    files.sort_by_key(|(version, _, _)| *version);

    let applied: HashSet<i64> = conn
        .prepare("SELECT version FROM schema_versions")?
        .query_map([], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();

    let mut pending = 0;
    for (version, name, sql) in &files {
        if applied.contains(version) {
            debug!(
                component = "migrations",
                event = "migration.skipped",
                version = version,
                name = %name,
            );
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(sql)
            .with_context(|| format!("migration {name} failed"))?;
        tx.execute(
            "INSERT INTO schema_versions (version, name) VALUES (?1, ?2)",
            params![version, name],
        )?;
        tx.commit()?;

        info!(
            component = "migrations",
            event = "migration.applied",
            version = version,
            name = %name,
            "Applied migration"
        );
        pending += 1;
    }

    let total = files.len();
    info!(
        component = "migrations",
        event = "migrations.complete",
        total = total,
        applied = pending,
        skipped = total - pending,
        "Migration check complete"
    );

    Ok(())
}

/// Extract numeric version prefix from a migration name like "001_storage".
fn parse_version(name: &str) -> Option<i64> {
    name.split('_').next()?.parse().ok()
}
