//! SQLite-based timer snapshot storage.
//!
//! Persists the whole store after every mutation and every tick that changed
//! something:
//! - `timers`: one row per live timer, keyed by timer id
//! - `kv`: store-wide values (`next_id`, `staging`)
//!
//! Saving is an idempotent full-snapshot write. Rows for ids that are no
//! longer live are deleted in the same transaction.
//!
//! A full snapshot is only safe with one writer. The long-running bot opens
//! the file with [`SqliteSnapshotStore::open_exclusive`], which keeps an
//! exclusive SQLite lock until the process exits; one-shot commands opening
//! the same file then fail with [`StorageError::Locked`] instead of
//! overwriting each other's timers.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StorageError;
use crate::store::StoreSnapshot;
use crate::timer::{Timer, TimerId, TimerState};

const KEY_NEXT_ID: &str = "next_id";
const KEY_STAGING: &str = "staging";
const KEY_OWNER_PID: &str = "owner_pid";

/// How long a connection waits for another one's lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

/// The persistence collaborator used by the engine.
pub trait SnapshotStore: Send {
    /// Read everything saved so far. An empty database yields an empty snapshot.
    fn load_all(&self) -> Result<StoreSnapshot, StorageError>;

    /// Replace the saved state with `snapshot`.
    fn save_all(&mut self, snapshot: &StoreSnapshot) -> Result<(), StorageError>;
}

pub struct SqliteSnapshotStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteSnapshotStore {
    /// Open (or create) the snapshot database at `path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path).map_err(|source| StorageError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let store = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        store.migrate()?;
        tracing::debug!(path = %path.display(), "snapshot database opened");
        Ok(store)
    }

    /// Open `path` and keep it locked against every other connection until
    /// this store is dropped.
    ///
    /// # Errors
    /// Returns [`StorageError::Locked`] if another process holds the file.
    pub fn open_exclusive(path: &Path) -> Result<Self, StorageError> {
        let store = Self::open(path)?;
        let mode: String = store.conn.pragma_update_and_check(
            None,
            "locking_mode",
            "EXCLUSIVE",
            |row| row.get(0),
        )?;
        tracing::debug!(%mode, "locking mode set");
        // The first write takes the exclusive lock; EXCLUSIVE mode never releases it.
        store.conn.execute_batch(&format!(
            "BEGIN EXCLUSIVE;
             INSERT OR REPLACE INTO kv (key, value) VALUES ('{KEY_OWNER_PID}', '{}');
             COMMIT;",
            std::process::id()
        ))?;
        tracing::info!(path = %path.display(), "snapshot database locked for this process");
        Ok(store)
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn, path: None };
        store.migrate()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn migrate(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS timers (
                id          INTEGER PRIMARY KEY,
                system      TEXT NOT NULL,
                structure   TEXT NOT NULL,
                tags        TEXT NOT NULL DEFAULT '[]',
                deadline    TEXT NOT NULL,
                state       TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_timers_deadline ON timers(deadline);",
        )?;
        Ok(())
    }

    pub fn kv_get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn read_timers(&self) -> Result<Vec<Timer>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, system, structure, tags, deadline, state, created_at
             FROM timers ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut timers = Vec::new();
        for row in rows {
            let (id, system, structure, tags, deadline, state, created_at) = row?;
            let corrupt = |message: String| StorageError::Corrupt { id, message };

            let timer_id = u32::try_from(id)
                .map(TimerId::new)
                .map_err(|e| corrupt(e.to_string()))?;
            let tags: Vec<String> =
                serde_json::from_str(&tags).map_err(|e| corrupt(format!("tags: {e}")))?;
            let state: TimerState = state.parse().map_err(corrupt)?;

            timers.push(Timer {
                id: timer_id,
                system,
                structure,
                tags,
                deadline: parse_utc(&deadline).map_err(|e| corrupt(format!("deadline: {e}")))?,
                state,
                created_at: parse_utc(&created_at)
                    .map_err(|e| corrupt(format!("created_at: {e}")))?,
            });
        }
        Ok(timers)
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn load_all(&self) -> Result<StoreSnapshot, StorageError> {
        let next_id = match self.kv_get(KEY_NEXT_ID)? {
            Some(raw) => raw.parse::<TimerId>().map_err(|e| StorageError::Corrupt {
                id: 0,
                message: format!("next_id '{raw}': {e}"),
            })?,
            None => TimerId::FIRST,
        };
        let staging = self.kv_get(KEY_STAGING)?;
        let timers = self.read_timers()?;

        Ok(StoreSnapshot {
            next_id,
            staging,
            timers,
        })
    }

    fn save_all(&mut self, snapshot: &StoreSnapshot) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;

        let live: HashSet<i64> = snapshot
            .timers
            .iter()
            .map(|t| i64::from(t.id.get()))
            .collect();

        let stale: Vec<i64> = {
            let mut stmt = tx.prepare("SELECT id FROM timers")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids.into_iter().filter(|id| !live.contains(id)).collect()
        };
        for id in &stale {
            tx.execute("DELETE FROM timers WHERE id = ?1", params![id])?;
        }

        for timer in &snapshot.timers {
            let tags = serde_json::to_string(&timer.tags)
                .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
            tx.execute(
                "INSERT INTO timers (id, system, structure, tags, deadline, state, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    system = excluded.system,
                    structure = excluded.structure,
                    tags = excluded.tags,
                    deadline = excluded.deadline,
                    state = excluded.state,
                    created_at = excluded.created_at",
                params![
                    i64::from(timer.id.get()),
                    timer.system,
                    timer.structure,
                    tags,
                    timer.deadline.to_rfc3339(),
                    timer.state.as_str(),
                    timer.created_at.to_rfc3339(),
                ],
            )?;
        }

        tx.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![KEY_NEXT_ID, snapshot.next_id.to_string()],
        )?;
        match &snapshot.staging {
            Some(staging) => {
                tx.execute(
                    "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                    params![KEY_STAGING, staging],
                )?;
            }
            None => {
                tx.execute("DELETE FROM kv WHERE key = ?1", params![KEY_STAGING])?;
            }
        }

        tx.commit()?;
        tracing::debug!(
            timers = snapshot.timers.len(),
            deleted = stale.len(),
            "snapshot saved"
        );
        Ok(())
    }
}

fn parse_utc(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn timer(id: u32, state: TimerState) -> Timer {
        Timer {
            id: TimerId::new(id),
            system: "9PX2-F".into(),
            structure: "WWW".into(),
            tags: vec!["VAPOR".into(), "FINAL".into()],
            deadline: Utc.with_ymd_and_hms(2025, 3, 5, 10, 56, 50).unwrap(),
            state,
            created_at: Utc.with_ymd_and_hms(2025, 3, 4, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn empty_database_loads_empty_snapshot() {
        let db = SqliteSnapshotStore::open_memory().unwrap();
        assert_eq!(db.load_all().unwrap(), StoreSnapshot::default());
    }

    #[test]
    fn save_then_load_restores_everything() {
        let mut db = SqliteSnapshotStore::open_memory().unwrap();
        let snapshot = StoreSnapshot {
            next_id: TimerId::new(1002),
            staging: Some("OJOS-T".into()),
            timers: vec![timer(1000, TimerState::Active), timer(1001, TimerState::Notified)],
        };
        db.save_all(&snapshot).unwrap();
        assert_eq!(db.load_all().unwrap(), snapshot);
    }

    #[test]
    fn save_deletes_timers_no_longer_live() {
        let mut db = SqliteSnapshotStore::open_memory().unwrap();
        let mut snapshot = StoreSnapshot {
            next_id: TimerId::new(1002),
            staging: Some("OJOS-T".into()),
            timers: vec![timer(1000, TimerState::Active), timer(1001, TimerState::Active)],
        };
        db.save_all(&snapshot).unwrap();

        snapshot.timers.remove(0);
        snapshot.timers[0].state = TimerState::Expired;
        snapshot.staging = None;
        db.save_all(&snapshot).unwrap();
        db.save_all(&snapshot).unwrap();

        let loaded = db.load_all().unwrap();
        assert_eq!(loaded.timers.len(), 1);
        assert_eq!(loaded.timers[0].state, TimerState::Expired);
        assert_eq!(loaded.staging, None);
    }

    #[test]
    fn exclusive_store_shuts_out_other_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timerboard.db");
        let snapshot = StoreSnapshot {
            next_id: TimerId::new(1001),
            staging: None,
            timers: vec![timer(1000, TimerState::Active)],
        };

        let mut held = SqliteSnapshotStore::open_exclusive(&path).unwrap();
        held.save_all(&snapshot).unwrap();
        assert_eq!(held.load_all().unwrap(), snapshot);

        assert!(matches!(
            SqliteSnapshotStore::open(&path),
            Err(StorageError::Locked)
        ));
        assert!(matches!(
            SqliteSnapshotStore::open_exclusive(&path),
            Err(StorageError::Locked)
        ));

        drop(held);
        let reopened = SqliteSnapshotStore::open(&path).unwrap();
        assert_eq!(reopened.load_all().unwrap(), snapshot);
    }

    #[test]
    fn corrupt_state_is_reported() {
        let db = SqliteSnapshotStore::open_memory().unwrap();
        db.conn
            .execute(
                "INSERT INTO timers (id, system, structure, tags, deadline, state, created_at)
                 VALUES (1000, 'A', 'B', '[]', '2025-03-05T10:56:50+00:00', 'exploded',
                         '2025-03-05T10:56:50+00:00')",
                [],
            )
            .unwrap();
        assert!(matches!(
            db.load_all(),
            Err(StorageError::Corrupt { id: 1000, .. })
        ));
    }
}
