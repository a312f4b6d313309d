//! Local fallback cache of upcoming reminders.
//!
//! The foreground context refreshes a full-replacement [`LocalSnapshot`] on a
//! cadence and after local edits. The snapshot lives in two places: an
//! in-memory mirror for same-process readers and a durable JSON file that the
//! background dispatcher can read when the foreground is unreachable.

pub mod poller;

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::Result;
use crate::model::{LocalSnapshot, Reminder, SnapshotEntry, seconds};
use crate::store::Store;

pub use poller::{FallbackPoller, PollerHandle};

/// File name of the durable snapshot inside the cache directory.
pub const SNAPSHOT_FILE_NAME: &str = "pending_reminders.json";

/// Query surface for upcoming reminders.
pub trait ReminderSource: Send + Sync {
    /// Unsent reminders for `owner_id` with `from <= due_time < until`.
    fn upcoming(
        &self,
        owner_id: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Reminder>>;
}

impl ReminderSource for Store {
    fn upcoming(
        &self,
        owner_id: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Reminder>> {
        self.upcoming_for_owner(owner_id, from, until)
    }
}

/// Read-only access to the durable snapshot, usable from a context that does
/// not own a [`FallbackCache`].
#[derive(Debug, Clone)]
pub struct DurableSnapshot {
    path: PathBuf,
}

impl DurableSnapshot {
    /// Snapshot file inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(SNAPSHOT_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot. Missing or corrupted files read as `None`.
    pub fn load(&self) -> Option<LocalSnapshot> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), "cannot read durable snapshot: {e}");
                return None;
            }
        };
        match serde_json::from_slice::<LocalSnapshot>(&bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(path = %self.path.display(), "ignoring corrupted durable snapshot: {e}");
                None
            }
        }
    }

    /// Replace the snapshot via temp file + rename.
    pub fn save(&self, snapshot: &LocalSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_vec(snapshot)?;
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// Owner of the fresh snapshot in the foreground context.
pub struct FallbackCache {
    source: Arc<dyn ReminderSource>,
    durable: DurableSnapshot,
    lookahead: Duration,
    mirror: RwLock<Option<LocalSnapshot>>,
}

impl FallbackCache {
    pub fn new(source: Arc<dyn ReminderSource>, config: &CacheConfig) -> Self {
        Self {
            source,
            durable: DurableSnapshot::in_dir(&config.dir),
            lookahead: seconds(config.lookahead_secs),
            mirror: RwLock::new(None),
        }
    }

    pub fn durable(&self) -> &DurableSnapshot {
        &self.durable
    }

    /// Capture the owner's upcoming reminders and replace both copies.
    ///
    /// # Errors
    ///
    /// Fails only when the reminder query fails; both copies are then left
    /// untouched. A durable write failure is logged and the mirror is still
    /// updated.
    pub fn refresh(&self, owner_id: &str, now: DateTime<Utc>) -> Result<LocalSnapshot> {
        let until = now
            .checked_add_signed(self.lookahead)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let entries: Vec<SnapshotEntry> = self
            .source
            .upcoming(owner_id, now, until)?
            .iter()
            .map(SnapshotEntry::from)
            .collect();
        let snapshot = LocalSnapshot::capture(owner_id, now, self.lookahead, entries);

        if let Err(e) = self.durable.save(&snapshot) {
            warn!(
                path = %self.durable.path().display(),
                "durable snapshot unavailable, keeping in-memory copy only: {e}"
            );
        }
        self.set_mirror(Some(snapshot.clone()));

        debug!(owner_id, count = snapshot.reminders.len(), "fallback cache refreshed");
        Ok(snapshot)
    }

    /// Current snapshot: the in-memory mirror first, then the durable file.
    pub fn read(&self) -> Option<LocalSnapshot> {
        let mirrored = match self.mirror.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        mirrored.or_else(|| self.durable.load())
    }

    /// Drop both copies, e.g. on sign-out.
    pub fn clear(&self) {
        self.set_mirror(None);
        match std::fs::remove_file(self.durable.path()) {
            Ok(()) => info!("fallback cache cleared"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("cannot remove durable snapshot: {e}"),
        }
    }

    fn set_mirror(&self, snapshot: Option<LocalSnapshot>) {
        match self.mirror.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }
}
