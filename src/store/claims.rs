use chrono::{DateTime, Duration, Utc};
use rusqlite::{TransactionBehavior, params};

use super::Store;
use crate::error::Result;
use crate::model::to_millis;

impl Store {
    /// Claim a reminder for delivery by `claimant` until `now + ttl`.
    ///
    /// `now` must be the time the claim is taken, not the start of a longer
    /// batch. Succeeds only while the reminder is still unsent and no other
    /// claim is live. An expired claim is taken over. Returns `false` on
    /// contention.
    pub fn try_claim_reminder(
        &self,
        reminder_id: &str,
        claimant: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool> {
        let expires_at = now
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let conn = self.lock()?;
        let rows = conn.execute(
            "INSERT INTO reminder_claims (reminder_id, claimed_by, expires_at) \
             SELECT ?1, ?2, ?4 \
             WHERE EXISTS (SELECT 1 FROM reminders WHERE id = ?1 AND sent = 0) \
             ON CONFLICT(reminder_id) DO UPDATE SET \
             claimed_by = excluded.claimed_by, expires_at = excluded.expires_at \
             WHERE reminder_claims.expires_at <= ?3",
            params![reminder_id, claimant, to_millis(now), to_millis(expires_at)],
        )?;
        Ok(rows == 1)
    }

    /// Mark a claimed reminder sent and drop `claimant`'s claim in one transaction.
    ///
    /// A claim taken over by another claimant is left in place. Returns `true`
    /// when this call flipped `sent`; `false` if it was already set.
    pub fn complete_delivery(
        &self,
        reminder_id: &str,
        claimant: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let flipped = tx.execute(
            "UPDATE reminders SET sent = 1, sent_at = ?2 WHERE id = ?1 AND sent = 0",
            params![reminder_id, to_millis(now)],
        )?;
        tx.execute(
            "DELETE FROM reminder_claims WHERE reminder_id = ?1 AND claimed_by = ?2",
            params![reminder_id, claimant],
        )?;
        tx.commit()?;
        Ok(flipped == 1)
    }

    /// Give up a claim without marking the reminder sent.
    pub fn release_claim(&self, reminder_id: &str, claimant: &str) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM reminder_claims WHERE reminder_id = ?1 AND claimed_by = ?2",
            params![reminder_id, claimant],
        )?;
        Ok(rows > 0)
    }
}
