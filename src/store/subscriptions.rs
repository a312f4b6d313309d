use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use super::Store;
use crate::error::{NudgeError, Result};
use crate::model::{DeviceSubscription, PushKeys, from_millis, to_millis};

const SUBSCRIPTION_COLUMNS: &str =
    "owner_id, endpoint, p256dh, auth, device_label, created_at, last_used_at";

impl Store {
    /// Insert a subscription, or refresh the existing `(owner_id, endpoint)`
    /// row. One statement; concurrent callers converge on a single row.
    ///
    /// An update bumps `last_used_at` and takes the caller's keys, since the
    /// browser may rotate them for the same endpoint. A non-empty label
    /// replaces the stored one. An older registration never overwrites a newer one.
    pub fn upsert_subscription(
        &self,
        owner_id: &str,
        endpoint: &str,
        keys: &PushKeys,
        device_label: &str,
        now: DateTime<Utc>,
    ) -> Result<DeviceSubscription> {
        let conn = self.lock()?;
        let sql = format!(
            "INSERT INTO device_subscriptions \
             (owner_id, endpoint, p256dh, auth, device_label, created_at, last_used_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6) \
             ON CONFLICT(owner_id, endpoint) DO UPDATE SET \
             p256dh = excluded.p256dh, \
             auth = excluded.auth, \
             device_label = CASE WHEN excluded.device_label <> '' \
             THEN excluded.device_label ELSE device_subscriptions.device_label END, \
             last_used_at = excluded.last_used_at \
             WHERE excluded.last_used_at >= device_subscriptions.last_used_at \
             RETURNING {SUBSCRIPTION_COLUMNS}"
        );
        let upserted = conn
            .query_row(
                &sql,
                params![
                    owner_id,
                    endpoint,
                    keys.p256dh,
                    keys.auth,
                    device_label,
                    to_millis(now)
                ],
                row_to_subscription,
            )
            .optional()?;
        match upserted {
            Some(subscription) => Ok(subscription),
            // Stale registration: the newer row was left untouched.
            None => find_one(&conn, owner_id, endpoint)?.ok_or_else(|| {
                NudgeError::Store(format!("subscription for {owner_id} vanished during upsert"))
            }),
        }
    }

    /// Exact-match lookup of one subscription row.
    pub fn find_subscription(
        &self,
        owner_id: &str,
        endpoint: &str,
    ) -> Result<Option<DeviceSubscription>> {
        let conn = self.lock()?;
        find_one(&conn, owner_id, endpoint)
    }

    /// All subscriptions for an owner, most recently used first.
    pub fn subscriptions_for_owner(&self, owner_id: &str) -> Result<Vec<DeviceSubscription>> {
        let conn = self.lock()?;
        load_for_owner(&conn, owner_id)
    }

    /// Delete one subscription. Returns `true` when a row was removed.
    pub fn delete_subscription(&self, owner_id: &str, endpoint: &str) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM device_subscriptions WHERE owner_id = ?1 AND endpoint = ?2",
            params![owner_id, endpoint],
        )?;
        Ok(rows > 0)
    }

    /// Delete every subscription for an owner. Returns the number removed.
    pub fn delete_subscriptions_for_owner(&self, owner_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        Ok(conn.execute(
            "DELETE FROM device_subscriptions WHERE owner_id = ?1",
            params![owner_id],
        )?)
    }

    /// Load an owner's rows and delete the endpoints chosen by `select_doomed`,
    /// all inside one immediate transaction. Returns the number deleted.
    pub fn prune_subscriptions<F>(&self, owner_id: &str, select_doomed: F) -> Result<usize>
    where
        F: FnOnce(&[DeviceSubscription]) -> Vec<String>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let rows = load_for_owner(&tx, owner_id)?;
        let doomed = select_doomed(&rows);

        let mut deleted = 0;
        for endpoint in &doomed {
            deleted += tx.execute(
                "DELETE FROM device_subscriptions WHERE owner_id = ?1 AND endpoint = ?2",
                params![owner_id, endpoint],
            )?;
        }
        tx.commit()?;
        Ok(deleted)
    }
}

fn find_one(
    conn: &Connection,
    owner_id: &str,
    endpoint: &str,
) -> Result<Option<DeviceSubscription>> {
    let sql = format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM device_subscriptions \
         WHERE owner_id = ?1 AND endpoint = ?2"
    );
    Ok(conn
        .query_row(&sql, params![owner_id, endpoint], row_to_subscription)
        .optional()?)
}

fn load_for_owner(conn: &Connection, owner_id: &str) -> Result<Vec<DeviceSubscription>> {
    let sql = format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM device_subscriptions \
         WHERE owner_id = ?1 ORDER BY last_used_at DESC, endpoint ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![owner_id], row_to_subscription)?;
    let mut subscriptions = Vec::new();
    for r in rows {
        subscriptions.push(r?);
    }
    Ok(subscriptions)
}

fn row_to_subscription(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeviceSubscription> {
    let created_at: i64 = row.get(5)?;
    let last_used_at: i64 = row.get(6)?;
    Ok(DeviceSubscription {
        owner_id: row.get(0)?,
        endpoint: row.get(1)?,
        keys: PushKeys {
            p256dh: row.get(2)?,
            auth: row.get(3)?,
        },
        device_label: row.get(4)?,
        created_at: from_millis(created_at),
        last_used_at: from_millis(last_used_at),
    })
}
