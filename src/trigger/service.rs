//! Scheduled sweep loop.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::DeliveryTrigger;

/// Runs [`DeliveryTrigger::sweep`] on a fixed interval until cancelled.
pub struct TriggerService {
    trigger: DeliveryTrigger,
    interval: Duration,
    cancel: CancellationToken,
}

impl TriggerService {
    /// Create a service sweeping every `interval`.
    ///
    /// Call [`run`](Self::run) to start the loop:
    ///
    /// ```rust,ignore
    /// let service = TriggerService::new(trigger, Duration::from_secs(60), cancel.child_token());
    /// tokio::spawn(service.run());
    /// ```
    pub fn new(trigger: DeliveryTrigger, interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            trigger,
            interval: interval.max(Duration::from_millis(1)),
            cancel,
        }
    }

    /// Sweep loop. The first sweep runs one full interval after start.
    pub async fn run(self) {
        info!(
            instance_id = self.trigger.instance_id(),
            interval_secs = self.interval.as_secs(),
            "delivery trigger loop started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Consume the immediate first tick.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("delivery trigger loop cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.trigger.sweep(Utc::now()).await {
                        warn!("scheduled sweep failed: {e}");
                    }
                }
            }
        }
    }
}
