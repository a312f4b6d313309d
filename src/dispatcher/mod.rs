//! Background notification dispatcher.
//!
//! Two paths render reminders on the device:
//!
//! - **push**: an inbound push payload is parsed and shown immediately.
//! - **fallback**: on its own timer the dispatcher asks the foreground for the
//!   pending snapshot (falling back to the durable copy), tracks every reminder
//!   it lists, and shows tracked reminders that are due within the fallback
//!   window. A reminder stays tracked after later snapshots drop it for being
//!   past due.
//!
//! Both paths share one [`DeliveryLedger`] keyed by reminder id, so a reminder
//! is shown at most once per dispatcher lifetime no matter which path sees it
//! first. The dispatcher never writes the reminder's `sent` flag.

mod ledger;
mod payload;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::DurableSnapshot;
use crate::config::DispatcherConfig;
use crate::error::{NudgeError, Result};
use crate::model::{LocalSnapshot, seconds};
use crate::sync::SyncRequester;

pub use ledger::{DeliveryLedger, DeliveryState};
pub use payload::{Notification, parse_push_payload};

/// Ledger entries are kept for this many fallback windows.
const LEDGER_RETENTION_WINDOWS: i32 = 2;

/// Host surface that actually shows a notification.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn show(&self, notification: &Notification) -> Result<()>;
}

/// Inputs delivered to the dispatcher task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatcherSignal {
    /// Raw inbound push payload.
    Push(Vec<u8>),
    /// The reminder was dismissed on another device.
    Dismissed(String),
}

/// Outcome of one render request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered,
    /// Already delivered, skipped, or in flight.
    Duplicate,
    Failed,
}

/// Counters from one fallback check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FallbackReport {
    pub rendered: usize,
    pub failed: usize,
    /// Entries newly marked skipped because they fell out of the window.
    pub expired: usize,
    /// `true` when the snapshot came over the sync channel.
    pub from_sync: bool,
}

/// Sender side used by the host to feed the dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    signal_tx: mpsc::Sender<DispatcherSignal>,
}

impl DispatcherHandle {
    pub async fn push(&self, raw: impl Into<Vec<u8>>) -> Result<()> {
        self.send(DispatcherSignal::Push(raw.into())).await
    }

    pub async fn dismissed(&self, reminder_id: impl Into<String>) -> Result<()> {
        self.send(DispatcherSignal::Dismissed(reminder_id.into()))
            .await
    }

    async fn send(&self, signal: DispatcherSignal) -> Result<()> {
        self.signal_tx
            .send(signal)
            .await
            .map_err(|e| NudgeError::Channel(format!("dispatcher is gone: {e}")))
    }
}

/// Background-context renderer.
pub struct NotificationDispatcher {
    sink: Arc<dyn NotificationSink>,
    sync: Option<SyncRequester>,
    durable: DurableSnapshot,
    fallback_interval: StdDuration,
    fallback_window: Duration,
    sync_timeout: StdDuration,
    generic: Notification,
    ledger: DeliveryLedger,
    /// Capture time of the newest snapshot applied so far.
    latest_capture: Option<DateTime<Utc>>,
    signal_rx: mpsc::Receiver<DispatcherSignal>,
    cancel: CancellationToken,
}

impl NotificationDispatcher {
    /// Create a dispatcher and the handle that feeds it signals.
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        durable: DurableSnapshot,
        config: &DispatcherConfig,
        cancel: CancellationToken,
    ) -> (Self, DispatcherHandle) {
        let (signal_tx, signal_rx) = mpsc::channel(64);
        let dispatcher = Self {
            sink,
            sync: None,
            durable,
            fallback_interval: StdDuration::from_secs(config.fallback_interval_secs.max(1)),
            fallback_window: seconds(config.fallback_window_secs),
            sync_timeout: StdDuration::from_millis(config.sync_timeout_ms.max(1)),
            generic: Notification::generic(&config.generic_title, &config.generic_body),
            ledger: DeliveryLedger::new(),
            latest_capture: None,
            signal_rx,
            cancel,
        };
        (dispatcher, DispatcherHandle { signal_tx })
    }

    /// Ask the foreground over `requester` before reading the durable copy.
    #[must_use]
    pub fn with_sync_requester(mut self, requester: SyncRequester) -> Self {
        self.sync = Some(requester);
        self
    }

    pub fn ledger(&self) -> &DeliveryLedger {
        &self.ledger
    }

    /// Render an inbound push payload.
    pub async fn handle_push(&mut self, raw: &[u8], now: DateTime<Utc>) -> RenderOutcome {
        let notification = parse_push_payload(raw, &self.generic);
        if notification.reminder_id.is_none() {
            debug!("push payload without reminder id, rendering generic notification");
        }
        self.render(&notification, now).await
    }

    /// Record a dismissal from another device.
    pub fn dismiss(&mut self, reminder_id: &str, now: DateTime<Utc>) {
        if self.ledger.skip(reminder_id, now) {
            debug!(reminder_id, "reminder dismissed elsewhere");
        }
    }

    /// One fallback check at `now`.
    pub async fn fallback_tick(&mut self, now: DateTime<Utc>) -> FallbackReport {
        let mut report = FallbackReport::default();
        match self.load_snapshot().await {
            Some((snapshot, from_sync)) => {
                report.from_sync = from_sync;
                self.absorb(&snapshot, now);
            }
            None => debug!("no pending snapshot available, using tracked reminders"),
        }

        for entry in self.ledger.pending_due(now) {
            if now - entry.due_time > self.fallback_window {
                if self.ledger.skip(&entry.id, now) {
                    debug!(reminder_id = %entry.id, "reminder past fallback window, skipping");
                    report.expired += 1;
                }
                continue;
            }
            let notification = Notification {
                title: self.generic.title.clone(),
                body: entry.text,
                reminder_id: Some(entry.id),
            };
            match self.render(&notification, now).await {
                RenderOutcome::Rendered => report.rendered += 1,
                RenderOutcome::Failed => report.failed += 1,
                RenderOutcome::Duplicate => {}
            }
        }

        self.prune(now);
        if report.rendered > 0 || report.failed > 0 {
            info!(
                rendered = report.rendered,
                failed = report.failed,
                expired = report.expired,
                from_sync = report.from_sync,
                "fallback check rendered reminders"
            );
        }
        report
    }

    /// Run until cancelled. Suspends only on a signal, the fallback timer, or shutdown.
    pub async fn run(mut self) {
        info!(
            interval_secs = self.fallback_interval.as_secs(),
            "notification dispatcher started"
        );
        let mut ticker = tokio::time::interval(self.fallback_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut signals_open = true;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("notification dispatcher cancelled");
                    break;
                }
                signal = self.signal_rx.recv(), if signals_open => match signal {
                    Some(DispatcherSignal::Push(raw)) => {
                        self.handle_push(&raw, Utc::now()).await;
                    }
                    Some(DispatcherSignal::Dismissed(id)) => self.dismiss(&id, Utc::now()),
                    None => {
                        debug!("dispatcher signal channel closed");
                        signals_open = false;
                    }
                },
                _ = ticker.tick() => {
                    self.fallback_tick(Utc::now()).await;
                }
            }
        }
    }

    /// Track the snapshot's reminders. Only a snapshot at least as new as the
    /// last one applied may drop tracked reminders it no longer lists.
    fn absorb(&mut self, snapshot: &LocalSnapshot, now: DateTime<Utc>) {
        for entry in &snapshot.reminders {
            self.ledger.remember(entry, now);
        }
        if self
            .latest_capture
            .is_some_and(|latest| snapshot.captured_at < latest)
        {
            debug!("older snapshot than already applied, not dropping tracked reminders");
            return;
        }
        self.latest_capture = Some(snapshot.captured_at);
        let forgotten = self.ledger.forget_missing(snapshot);
        if forgotten > 0 {
            debug!(forgotten, "stopped tracking reminders no longer pending");
        }
    }

    async fn load_snapshot(&self) -> Option<(LocalSnapshot, bool)> {
        if let Some(sync) = &self.sync {
            if let Some(snapshot) = sync.request_pending(self.sync_timeout).await {
                return Some((snapshot, true));
            }
        }
        self.durable.load().map(|snapshot| (snapshot, false))
    }

    async fn render(&mut self, notification: &Notification, now: DateTime<Utc>) -> RenderOutcome {
        if let Some(id) = &notification.reminder_id {
            if !self.ledger.begin_attempt(id, now) {
                debug!(reminder_id = %id, "already rendered or skipped");
                return RenderOutcome::Duplicate;
            }
        }

        let rendered = match self.sink.show(notification).await {
            Ok(()) => true,
            Err(e) => {
                warn!(reminder_id = ?notification.reminder_id, "failed to show notification: {e}");
                false
            }
        };
        if let Some(id) = &notification.reminder_id {
            self.ledger.finish_attempt(id, rendered, now);
        }

        if rendered {
            RenderOutcome::Rendered
        } else {
            RenderOutcome::Failed
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let retention = self
            .fallback_window
            .checked_mul(LEDGER_RETENTION_WINDOWS)
            .unwrap_or(Duration::MAX);
        let pruned = self.ledger.prune(now, retention);
        if pruned > 0 {
            debug!(pruned, "pruned dispatcher ledger");
        }
    }
}
