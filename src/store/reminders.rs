use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use super::Store;
use crate::error::Result;
use crate::model::{NewReminder, Reminder, from_millis, to_millis};

const REMINDER_COLUMNS: &str = "id, owner_id, text, due_at, sent, list_id";

impl Store {
    /// Insert a reminder on behalf of the task-management surface.
    pub fn create_reminder(&self, new: NewReminder) -> Result<Reminder> {
        let conn = self.lock()?;
        let id = Uuid::new_v4().to_string();
        let now = to_millis(Utc::now());
        conn.execute(
            "INSERT INTO reminders (id, owner_id, text, due_at, sent, list_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
            params![
                id,
                new.owner_id,
                new.text,
                to_millis(new.due_time),
                new.list_id,
                now
            ],
        )?;

        Ok(Reminder {
            id,
            owner_id: new.owner_id,
            text: new.text,
            due_time: new.due_time,
            sent: false,
            list_id: new.list_id,
        })
    }

    /// Look up one reminder by id.
    pub fn get_reminder(&self, id: &str) -> Result<Option<Reminder>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], row_to_reminder).optional()?)
    }

    /// Unsent reminders with `due_time <= now`, oldest first, at most `limit`.
    pub fn due_unsent(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Reminder>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders \
             WHERE sent = 0 AND due_at <= ?1 ORDER BY due_at ASC, id ASC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![to_millis(now), limit], row_to_reminder)?;
        let mut reminders = Vec::new();
        for r in rows {
            reminders.push(r?);
        }
        Ok(reminders)
    }

    /// Unsent reminders for `owner_id` with `from <= due_time < until`.
    pub fn upcoming_for_owner(
        &self,
        owner_id: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Reminder>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders \
             WHERE owner_id = ?1 AND sent = 0 AND due_at >= ?2 AND due_at < ?3 \
             ORDER BY due_at ASC, id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![owner_id, to_millis(from), to_millis(until)],
            row_to_reminder,
        )?;
        let mut reminders = Vec::new();
        for r in rows {
            reminders.push(r?);
        }
        Ok(reminders)
    }
}

fn row_to_reminder(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reminder> {
    let due_at: i64 = row.get(3)?;
    let sent: i64 = row.get(4)?;
    Ok(Reminder {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        text: row.get(2)?,
        due_time: from_millis(due_at),
        sent: sent != 0,
        list_id: row.get(5)?,
    })
}
