//! Remote delivery trigger.
//!
//! A sweep selects due, unsent reminders, claims each one, fans the push out to
//! every registered device of its owner, and only then marks it sent. Claims
//! carry a short expiry so overlapping sweeps (retried jobs, several
//! schedulers) never double-deliver while a crashed sweep's work is picked up
//! once its claim lapses.

mod service;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TriggerConfig;
use crate::error::{DeliveryError, Result};
use crate::model::{DeviceSubscription, Reminder, seconds};
use crate::store::Store;
use crate::transport::{PushPayload, PushTransport};

pub use service::TriggerService;

/// Counters reported by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    /// Reminders this sweep claimed and fanned out.
    pub processed: usize,
    /// Successful device deliveries.
    pub delivered: usize,
    /// Failed device deliveries (rejected or transient).
    pub failed: usize,
    /// Reminders skipped because another sweep holds their claim.
    pub contended: usize,
    /// Subscriptions deleted after the push service rejected them.
    pub pruned: usize,
}

/// Per-reminder fan-out result.
#[derive(Debug, Default)]
struct FanOut {
    delivered: usize,
    failed: usize,
    pruned: usize,
}

/// Scans the store for due reminders and delivers them.
#[derive(Clone)]
pub struct DeliveryTrigger {
    store: Arc<Store>,
    transport: Arc<dyn PushTransport>,
    instance_id: String,
    claim_ttl: Duration,
    batch_size: usize,
}

impl DeliveryTrigger {
    pub fn new(store: Arc<Store>, transport: Arc<dyn PushTransport>, config: &TriggerConfig) -> Self {
        Self {
            store,
            transport,
            instance_id: format!("sweep-{}", Uuid::new_v4()),
            claim_ttl: seconds(config.claim_ttl_secs),
            batch_size: config.batch_size.max(1),
        }
    }

    /// Override the claimant id (distinct per concurrent sweeper).
    #[must_use]
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Run one sweep at `now`.
    ///
    /// `now` selects the due reminders. Each claim is stamped with `now` plus
    /// the time the sweep has spent so far, so a long batch never hands out
    /// claims that are already expired.
    ///
    /// # Errors
    ///
    /// Fails only when the due-reminder query itself fails. Per-reminder and
    /// per-device problems are logged and counted, never propagated.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepSummary> {
        let started = Instant::now();
        let due = self.store.due_unsent(now, self.batch_size)?;
        let mut summary = SweepSummary::default();
        if due.is_empty() {
            debug!("sweep found no due reminders");
            return Ok(summary);
        }

        for reminder in due {
            let claimed_at = elapsed_since(now, started);
            match self
                .store
                .try_claim_reminder(&reminder.id, &self.instance_id, claimed_at, self.claim_ttl)
            {
                Ok(true) => {}
                Ok(false) => {
                    debug!(reminder_id = %reminder.id, "reminder claimed elsewhere, skipping");
                    summary.contended += 1;
                    continue;
                }
                Err(e) => {
                    warn!(reminder_id = %reminder.id, "cannot claim reminder: {e}");
                    continue;
                }
            }

            let devices = match self.store.subscriptions_for_owner(&reminder.owner_id) {
                Ok(devices) => devices,
                Err(e) => {
                    warn!(reminder_id = %reminder.id, "cannot load devices, releasing claim: {e}");
                    if let Err(e) = self.store.release_claim(&reminder.id, &self.instance_id) {
                        warn!(reminder_id = %reminder.id, "cannot release claim: {e}");
                    }
                    continue;
                }
            };

            summary.processed += 1;
            let fan_out = self.fan_out(&reminder, &devices).await;
            summary.delivered += fan_out.delivered;
            summary.failed += fan_out.failed;
            summary.pruned += fan_out.pruned;

            let sent_at = elapsed_since(now, started);
            match self
                .store
                .complete_delivery(&reminder.id, &self.instance_id, sent_at)
            {
                Ok(true) => debug!(reminder_id = %reminder.id, "reminder marked sent"),
                Ok(false) => debug!(reminder_id = %reminder.id, "reminder was already marked sent"),
                Err(e) => warn!(
                    reminder_id = %reminder.id,
                    "cannot mark reminder sent, claim will lapse: {e}"
                ),
            }
        }

        info!(
            processed = summary.processed,
            delivered = summary.delivered,
            failed = summary.failed,
            contended = summary.contended,
            pruned = summary.pruned,
            "sweep complete"
        );
        Ok(summary)
    }

    /// Deliver to every device concurrently; one device's failure never
    /// affects another's attempt.
    async fn fan_out(&self, reminder: &Reminder, devices: &[DeviceSubscription]) -> FanOut {
        let payload = PushPayload::for_reminder(reminder);
        let attempts = devices.iter().map(|device| {
            let payload = &payload;
            async move { (device, self.transport.deliver(device, payload).await) }
        });

        let mut fan_out = FanOut::default();
        for (device, result) in join_all(attempts).await {
            match result {
                Ok(()) => fan_out.delivered += 1,
                Err(err) => {
                    fan_out.failed += 1;
                    self.handle_failure(reminder, device, &err, &mut fan_out);
                }
            }
        }
        fan_out
    }

    fn handle_failure(
        &self,
        reminder: &Reminder,
        device: &DeviceSubscription,
        err: &DeliveryError,
        fan_out: &mut FanOut,
    ) {
        if !err.is_rejected() {
            warn!(
                reminder_id = %reminder.id,
                device = %device.device_label,
                "transient push failure, not retried: {err}"
            );
            return;
        }

        match self
            .store
            .delete_subscription(&device.owner_id, &device.endpoint)
        {
            Ok(true) => {
                info!(
                    owner_id = %device.owner_id,
                    device = %device.device_label,
                    "pruned rejected push subscription: {err}"
                );
                fan_out.pruned += 1;
            }
            Ok(false) => {}
            Err(e) => warn!(owner_id = %device.owner_id, "cannot prune rejected subscription: {e}"),
        }
    }
}

/// `origin` advanced by the monotonic time elapsed since `started`.
fn elapsed_since(origin: DateTime<Utc>, started: Instant) -> DateTime<Utc> {
    Duration::from_std(started.elapsed())
        .ok()
        .and_then(|elapsed| origin.checked_add_signed(elapsed))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
