//! Per-reminder rendering state, keyed by reminder id.
//!
//! Reminders learned from a snapshot stay tracked as `Pending` until they are
//! rendered or skipped, so a reminder that later snapshots no longer list
//! (because it is already past due) still renders.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{LocalSnapshot, SnapshotEntry};

/// Rendering state of one reminder inside the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Attempting,
    /// Rendered. Terminal.
    Delivered,
    /// Dismissed elsewhere or past the fallback window. Terminal.
    Skipped,
}

impl DeliveryState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Skipped)
    }
}

#[derive(Debug, Clone)]
struct LedgerEntry {
    state: DeliveryState,
    updated_at: DateTime<Utc>,
    /// Last known content, kept while the reminder is not terminal.
    reminder: Option<SnapshotEntry>,
}

impl LedgerEntry {
    /// Age reference for pruning: a tracked reminder is not stale before it is due.
    fn touched_at(&self) -> DateTime<Utc> {
        self.reminder
            .as_ref()
            .map_or(self.updated_at, |r| r.due_time.max(self.updated_at))
    }
}

/// De-duplication ledger shared by the push and fallback paths.
#[derive(Debug, Default)]
pub struct DeliveryLedger {
    entries: HashMap<String, LedgerEntry>,
}

impl DeliveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state; unseen ids are `Pending`.
    pub fn state(&self, reminder_id: &str) -> DeliveryState {
        self.entries
            .get(reminder_id)
            .map_or(DeliveryState::Pending, |e| e.state)
    }

    /// Move `Pending → Attempting`. Returns `false` if the id is terminal or
    /// already being attempted.
    pub fn begin_attempt(&mut self, reminder_id: &str, now: DateTime<Utc>) -> bool {
        if self.state(reminder_id) != DeliveryState::Pending {
            return false;
        }
        self.set(reminder_id, DeliveryState::Attempting, now);
        true
    }

    /// Finish an attempt: `Delivered` on success, back to `Pending` on failure.
    pub fn finish_attempt(&mut self, reminder_id: &str, rendered: bool, now: DateTime<Utc>) {
        if self.state(reminder_id) != DeliveryState::Attempting {
            return;
        }
        let next = if rendered {
            DeliveryState::Delivered
        } else {
            DeliveryState::Pending
        };
        self.set(reminder_id, next, now);
    }

    /// Mark `Skipped` unless already terminal. Returns `true` on transition.
    pub fn skip(&mut self, reminder_id: &str, now: DateTime<Utc>) -> bool {
        if self.state(reminder_id).is_terminal() {
            return false;
        }
        self.set(reminder_id, DeliveryState::Skipped, now);
        true
    }

    /// Track a reminder seen in a snapshot. Terminal ids are left alone.
    pub fn remember(&mut self, reminder: &SnapshotEntry, now: DateTime<Utc>) {
        match self.entries.get_mut(&reminder.id) {
            Some(entry) if entry.state.is_terminal() => {}
            Some(entry) => {
                entry.reminder = Some(reminder.clone());
                entry.updated_at = now;
            }
            None => {
                self.entries.insert(
                    reminder.id.clone(),
                    LedgerEntry {
                        state: DeliveryState::Pending,
                        updated_at: now,
                        reminder: Some(reminder.clone()),
                    },
                );
            }
        }
    }

    /// Stop tracking pending reminders that `snapshot` should list but does not.
    ///
    /// A snapshot lists every unsent reminder due from its capture time on, so
    /// a tracked reminder due at or after `captured_at` that is missing from it
    /// was deleted or rescheduled. Returns the count dropped.
    pub fn forget_missing(&mut self, snapshot: &LocalSnapshot) -> usize {
        let listed: HashSet<&str> = snapshot.reminders.iter().map(|r| r.id.as_str()).collect();
        let before = self.entries.len();
        self.entries.retain(|id, entry| {
            entry.state != DeliveryState::Pending
                || entry.reminder.as_ref().is_none_or(|r| {
                    r.due_time < snapshot.captured_at || listed.contains(id.as_str())
                })
        });
        before - self.entries.len()
    }

    /// Tracked pending reminders due at or before `now`, oldest first.
    pub fn pending_due(&self, now: DateTime<Utc>) -> Vec<SnapshotEntry> {
        let mut due: Vec<SnapshotEntry> = self
            .entries
            .values()
            .filter(|entry| entry.state == DeliveryState::Pending)
            .filter_map(|entry| entry.reminder.clone())
            .filter(|r| r.due_time <= now)
            .collect();
        due.sort_by(|a, b| a.due_time.cmp(&b.due_time).then_with(|| a.id.cmp(&b.id)));
        due
    }

    /// Drop entries untouched for longer than `retention`. Returns the count removed.
    pub fn prune(&mut self, now: DateTime<Utc>, retention: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now - entry.touched_at() <= retention);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn set(&mut self, reminder_id: &str, state: DeliveryState, now: DateTime<Utc>) {
        let entry = self
            .entries
            .entry(reminder_id.to_owned())
            .or_insert(LedgerEntry {
                state,
                updated_at: now,
                reminder: None,
            });
        entry.state = state;
        entry.updated_at = now;
        if state.is_terminal() {
            entry.reminder = None;
        }
    }
}
