//! Shared domain types for reminders, device subscriptions and snapshots.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A time-scheduled reminder owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub owner_id: String,
    pub text: String,
    pub due_time: DateTime<Utc>,
    /// Flips false → true exactly once, set only by the delivery trigger.
    pub sent: bool,
    #[serde(default)]
    pub list_id: Option<String>,
}

/// Fields needed to create a reminder. Written by the task-management surface.
#[derive(Debug, Clone)]
pub struct NewReminder {
    pub owner_id: String,
    pub text: String,
    pub due_time: DateTime<Utc>,
    pub list_id: Option<String>,
}

impl NewReminder {
    pub fn new(owner_id: impl Into<String>, text: impl Into<String>, due_time: DateTime<Utc>) -> Self {
        Self {
            owner_id: owner_id.into(),
            text: text.into(),
            due_time,
            list_id: None,
        }
    }

    #[must_use]
    pub fn with_list(mut self, list_id: impl Into<String>) -> Self {
        self.list_id = Some(list_id.into());
        self
    }
}

/// Web Push encryption keys issued by the browser with a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushKeys {
    /// Base64url P-256 public key of the user agent.
    pub p256dh: String,
    /// Base64url authentication secret.
    pub auth: String,
}

/// One registered push endpoint for a user's device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSubscription {
    pub endpoint: String,
    pub keys: PushKeys,
    pub owner_id: String,
    pub device_label: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

/// A pending reminder as held in the fallback cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub id: String,
    pub text: String,
    pub due_time: DateTime<Utc>,
}

impl From<&Reminder> for SnapshotEntry {
    fn from(reminder: &Reminder) -> Self {
        Self {
            id: reminder.id.clone(),
            text: reminder.text.clone(),
            due_time: reminder.due_time,
        }
    }
}

/// Full-replacement capture of a user's upcoming reminders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSnapshot {
    pub owner_id: String,
    pub captured_at: DateTime<Utc>,
    /// Sorted by `due_time`, then `id`.
    pub reminders: Vec<SnapshotEntry>,
}

impl LocalSnapshot {
    /// Build a snapshot, keeping only entries inside `[captured_at, captured_at + lookahead)`.
    #[must_use]
    pub fn capture(
        owner_id: impl Into<String>,
        captured_at: DateTime<Utc>,
        lookahead: Duration,
        mut reminders: Vec<SnapshotEntry>,
    ) -> Self {
        let horizon = captured_at
            .checked_add_signed(lookahead)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        reminders.retain(|r| r.due_time >= captured_at && r.due_time < horizon);
        reminders.sort_by(|a, b| a.due_time.cmp(&b.due_time).then_with(|| a.id.cmp(&b.id)));
        Self {
            owner_id: owner_id.into(),
            captured_at,
            reminders,
        }
    }
}

/// Whole seconds from config as a signed duration, saturating on overflow.
#[must_use]
pub fn seconds(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

/// Convert a timestamp into the store's epoch-millisecond representation.
#[must_use]
pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Convert epoch milliseconds back into a timestamp, clamping invalid values to the epoch.
#[must_use]
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}
