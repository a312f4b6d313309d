//! Device registry: the set of push endpoints registered per user.
//!
//! Registration is an atomic upsert keyed by `(owner_id, endpoint)`, so any
//! number of concurrent `register` calls for the same endpoint leave exactly
//! one row behind. Rows that differ only by transport-added query-string noise
//! are collapsed by [`DeviceRegistry::deduplicate`].

pub mod client;
pub mod endpoint;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::model::{DeviceSubscription, PushKeys};
use crate::store::Store;

pub use endpoint::normalize_endpoint;

/// Result of a deduplication pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupReport {
    /// Rows deleted.
    pub deleted_count: usize,
    /// Normalized endpoints that had more than one row.
    pub duplicate_groups: usize,
}

/// Read-only aggregate for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySummary {
    pub total: usize,
    pub unique_endpoints: usize,
    /// `total - unique_endpoints`.
    pub duplicates: usize,
}

/// Server-side device registry backed by the shared [`Store`].
#[derive(Clone)]
pub struct DeviceRegistry {
    store: Arc<Store>,
}

impl DeviceRegistry {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Register `endpoint` for `owner_id`, reusing an existing row if present.
    pub fn register(
        &self,
        owner_id: &str,
        endpoint: &str,
        keys: &PushKeys,
        label: &str,
    ) -> Result<DeviceSubscription> {
        self.register_at(owner_id, endpoint, keys, label, Utc::now())
    }

    /// [`register`](Self::register) with an explicit clock.
    pub fn register_at(
        &self,
        owner_id: &str,
        endpoint: &str,
        keys: &PushKeys,
        label: &str,
        now: DateTime<Utc>,
    ) -> Result<DeviceSubscription> {
        let subscription = self
            .store
            .upsert_subscription(owner_id, endpoint, keys, label, now)?;
        if subscription.created_at == subscription.last_used_at {
            info!(owner_id, label, "registered new push endpoint");
        } else {
            debug!(owner_id, "reused existing push endpoint registration");
        }
        Ok(subscription)
    }

    /// `true` when `endpoint` still has a matching row for `owner_id`.
    pub fn validate(&self, owner_id: &str, endpoint: &str) -> Result<bool> {
        Ok(self.store.find_subscription(owner_id, endpoint)?.is_some())
    }

    /// All subscriptions for `owner_id`, most recently used first.
    pub fn list(&self, owner_id: &str) -> Result<Vec<DeviceSubscription>> {
        self.store.subscriptions_for_owner(owner_id)
    }

    /// Remove one registration. Returns `true` when a row was deleted.
    pub fn remove(&self, owner_id: &str, endpoint: &str) -> Result<bool> {
        let removed = self.store.delete_subscription(owner_id, endpoint)?;
        if removed {
            info!(owner_id, "removed push endpoint registration");
        }
        Ok(removed)
    }

    /// Explicit user-initiated reset: drop every registration for `owner_id`.
    pub fn reset(&self, owner_id: &str) -> Result<usize> {
        let deleted = self.store.delete_subscriptions_for_owner(owner_id)?;
        info!(owner_id, deleted, "reset push endpoint registrations");
        Ok(deleted)
    }

    /// Collapse rows sharing a normalized endpoint down to the most recently used one.
    pub fn deduplicate(&self, owner_id: &str) -> Result<DedupReport> {
        let mut duplicate_groups = 0;
        let deleted_count = self.store.prune_subscriptions(owner_id, |rows| {
            let (doomed, groups) = select_duplicates(rows);
            duplicate_groups = groups;
            doomed
        })?;

        if deleted_count > 0 {
            info!(
                owner_id,
                deleted_count, duplicate_groups, "removed duplicate push registrations"
            );
        } else {
            debug!(owner_id, "no duplicate push registrations");
        }

        Ok(DedupReport {
            deleted_count,
            duplicate_groups,
        })
    }

    /// Totals for diagnostics. Uniqueness is judged on the normalized endpoint.
    pub fn summary(&self, owner_id: &str) -> Result<RegistrySummary> {
        let rows = self.store.subscriptions_for_owner(owner_id)?;
        let unique: HashSet<String> = rows
            .iter()
            .map(|s| normalize_endpoint(&s.endpoint))
            .collect();
        let total = rows.len();
        let unique_endpoints = unique.len();
        Ok(RegistrySummary {
            total,
            unique_endpoints,
            duplicates: total.saturating_sub(unique_endpoints),
        })
    }
}

/// Pick the endpoints to delete: every row of a normalized group except the
/// most recently used (ties broken by newest `created_at`, then endpoint).
fn select_duplicates(rows: &[DeviceSubscription]) -> (Vec<String>, usize) {
    let mut groups: HashMap<String, Vec<&DeviceSubscription>> = HashMap::new();
    for row in rows {
        groups
            .entry(normalize_endpoint(&row.endpoint))
            .or_default()
            .push(row);
    }

    let mut doomed = Vec::new();
    let mut duplicate_groups = 0;
    for members in groups.values() {
        if members.len() < 2 {
            continue;
        }
        duplicate_groups += 1;
        let keeper = members.iter().max_by(|a, b| {
            a.last_used_at
                .cmp(&b.last_used_at)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.endpoint.cmp(&b.endpoint))
        });
        let Some(keeper) = keeper else {
            continue;
        };
        doomed.extend(
            members
                .iter()
                .filter(|m| m.endpoint != keeper.endpoint)
                .map(|m| m.endpoint.clone()),
        );
    }
    (doomed, duplicate_groups)
}
