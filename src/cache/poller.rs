//! Foreground refresh loop for the fallback cache.
//!
//! [`FallbackPoller`] refreshes the snapshot immediately, then on a fixed
//! interval and whenever [`PollerHandle::refresh_now`] is called after a local
//! edit. It also answers the dispatcher's sync requests from the mirror.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::FallbackCache;
use crate::config::CacheConfig;
use crate::sync::{PendingSyncRequest, SyncResponder};

/// Control handle for a running [`FallbackPoller`].
#[derive(Clone)]
pub struct PollerHandle {
    wake: Arc<Notify>,
    cancel: CancellationToken,
}

impl PollerHandle {
    /// Request an out-of-cycle refresh, e.g. after a reminder create or edit.
    pub fn refresh_now(&self) {
        self.wake.notify_one();
    }

    /// Stop the poller (foreground teardown).
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Periodic refresher bound to one owner.
pub struct FallbackPoller {
    cache: Arc<FallbackCache>,
    owner_id: String,
    interval: Duration,
    responder: Option<SyncResponder>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
}

impl FallbackPoller {
    pub fn new(
        cache: Arc<FallbackCache>,
        owner_id: impl Into<String>,
        config: &CacheConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cache,
            owner_id: owner_id.into(),
            interval: Duration::from_secs(config.refresh_interval_secs.max(1)),
            responder: None,
            wake: Arc::new(Notify::new()),
            cancel,
        }
    }

    /// Answer sync requests arriving on `responder` while running.
    #[must_use]
    pub fn with_sync_responder(mut self, responder: SyncResponder) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn handle(&self) -> PollerHandle {
        PollerHandle {
            wake: Arc::clone(&self.wake),
            cancel: self.cancel.clone(),
        }
    }

    /// Run until the cancellation token fires.
    pub async fn run(mut self) {
        info!(owner_id = %self.owner_id, "fallback cache poller started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(owner_id = %self.owner_id, "fallback cache poller cancelled");
                    break;
                }
                _ = ticker.tick() => self.refresh(),
                _ = self.wake.notified() => {
                    debug!(owner_id = %self.owner_id, "out-of-cycle refresh");
                    self.refresh();
                }
                request = next_request(&mut self.responder) => match request {
                    Some(request) => self.answer(request),
                    None => {
                        debug!("sync requesters gone, no longer answering");
                        self.responder = None;
                    }
                },
            }
        }
    }

    fn refresh(&self) {
        if let Err(e) = self.cache.refresh(&self.owner_id, Utc::now()) {
            warn!(owner_id = %self.owner_id, "fallback cache refresh failed, retrying next cycle: {e}");
        }
    }

    fn answer(&self, request: PendingSyncRequest) {
        let snapshot = self.cache.read();
        debug!(
            entries = snapshot.as_ref().map_or(0, |s| s.reminders.len()),
            "answering sync request"
        );
        request.respond(snapshot);
    }
}

async fn next_request(responder: &mut Option<SyncResponder>) -> Option<PendingSyncRequest> {
    match responder {
        Some(responder) => responder.recv().await,
        None => std::future::pending().await,
    }
}
