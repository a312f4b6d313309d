//! SQLite-backed store for reminders, device subscriptions and sweep claims.
//!
//! Every mutating operation is either a single conditional statement or a
//! single transaction, so concurrent tabs and overlapping sweeps never observe
//! or leave a half-applied write.

mod claims;
mod reminders;
pub(crate) mod schema;
mod subscriptions;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;

use crate::error::{NudgeError, Result};

/// How long a connection waits on a lock held by another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Thread-safe handle to the delivery database.
///
/// Writes are serialized through an internal `Mutex<Connection>`; separate
/// processes coordinate through SQLite locking.
pub struct Store {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path`, applying the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn, Some(path.to_path_buf()))
    }

    /// Open a private in-memory database. Used by tests and ephemeral tools.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, None)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        schema::apply_schema(&conn)?;
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Database file path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Schema version stamped in the database.
    pub fn schema_version(&self) -> Result<Option<u32>> {
        let conn = self.lock()?;
        Ok(schema::read_schema_version(&conn)?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| NudgeError::Store(format!("connection lock poisoned: {e}")))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn open_creates_parent_dirs_and_schema() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("nudge.db");
        let store = Store::open(&path).expect("open");
        assert_eq!(store.path(), Some(path.as_path()));
        assert_eq!(
            store.schema_version().expect("version"),
            Some(schema::CURRENT_SCHEMA_VERSION)
        );
    }

    #[test]
    fn reopen_keeps_existing_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nudge.db");
        {
            let store = Store::open(&path).expect("open");
            store
                .create_reminder(crate::model::NewReminder::new(
                    "owner",
                    "water plants",
                    crate::model::from_millis(1_000),
                ))
                .expect("create");
        }
        let store = Store::open(&path).expect("reopen");
        let due = store
            .due_unsent(crate::model::from_millis(2_000), 10)
            .expect("due");
        assert_eq!(due.len(), 1);
    }
}
