//! SQLite DDL for the reminder delivery store.
//!
//! All `CREATE TABLE` / `CREATE INDEX` / `CREATE TRIGGER` statements live here so
//! they are reviewable and testable in isolation.

use rusqlite::Connection;

/// Current schema version stamped into `schema_meta`.
pub(crate) const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Complete DDL for the store. Uses `IF NOT EXISTS` throughout so
/// `apply_schema` is idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
-- Concurrent readers while a sweep writes.
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Reminders written by the task-management surface; `sent` is owned by the trigger.
CREATE TABLE IF NOT EXISTS reminders (
    id         TEXT PRIMARY KEY,
    owner_id   TEXT NOT NULL,
    text       TEXT NOT NULL,
    due_at     INTEGER NOT NULL,          -- epoch millis
    sent       INTEGER NOT NULL DEFAULT 0,
    sent_at    INTEGER,
    list_id    TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reminders_unsent_due ON reminders(sent, due_at);
CREATE INDEX IF NOT EXISTS idx_reminders_owner_due  ON reminders(owner_id, due_at);

-- `sent` never goes back to 0.
CREATE TRIGGER IF NOT EXISTS reminders_sent_monotonic
BEFORE UPDATE OF sent ON reminders
WHEN OLD.sent = 1 AND NEW.sent = 0
BEGIN
    SELECT RAISE(ABORT, 'reminder sent flag cannot be cleared');
END;

-- One row per (owner, endpoint); re-registration is an upsert on this key.
CREATE TABLE IF NOT EXISTS device_subscriptions (
    owner_id     TEXT NOT NULL,
    endpoint     TEXT NOT NULL,
    p256dh       TEXT NOT NULL,
    auth         TEXT NOT NULL,
    device_label TEXT NOT NULL DEFAULT '',
    created_at   INTEGER NOT NULL,
    last_used_at INTEGER NOT NULL,
    PRIMARY KEY (owner_id, endpoint)
);

-- Short-lived per-reminder claims held by an in-flight sweep.
CREATE TABLE IF NOT EXISTS reminder_claims (
    reminder_id TEXT PRIMARY KEY,
    claimed_by  TEXT NOT NULL,
    expires_at  INTEGER NOT NULL
);
"#;

/// Apply the full schema to an open connection and seed the version stamp.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Read the current schema version, or `None` when unset.
pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().ok())
        }
        None => Ok(None),
    }
}
