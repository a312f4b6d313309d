//! Shared helpers for integration tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nudge::dispatcher::{Notification, NotificationSink};
use nudge::model::{PushKeys, from_millis};
use nudge::registry::client::{PlatformSubscription, PushPlatform};
use nudge::store::Store;

/// Fixed reference instant used by deterministic scenarios.
pub(crate) fn t0() -> DateTime<Utc> {
    from_millis(1_700_000_000_000)
}

pub(crate) fn keys() -> PushKeys {
    PushKeys {
        p256dh: "BNcRdreALRFXTkOOUHK1EtK2wtaz5Ry4YfYCA_0QTpQtUbVlUls0VJXg7A8u-Ts1XbjhazAkj7I99e8QcYP7DkM".to_owned(),
        auth: "tBHItJI5svbpez7KI4CCXg".to_owned(),
    }
}

/// File-backed store in a fresh temp dir. Keep the dir alive for the test.
pub(crate) fn temp_store() -> (Arc<Store>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = Store::open(&dir.path().join("nudge.db")).expect("open store");
    (Arc::new(store), dir)
}

/// Records every notification shown.
#[derive(Default)]
pub(crate) struct RecordingSink {
    shown: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub(crate) fn shown(&self) -> Vec<Notification> {
        self.shown.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn show(&self, notification: &Notification) -> nudge::Result<()> {
        self.shown.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Browser-like push manager: `subscribe` returns the live subscription when
/// one exists, so every tab of the same browser sees the same endpoint.
pub(crate) struct BrowserPlatform {
    endpoint: String,
    current: Mutex<Option<PlatformSubscription>>,
}

impl BrowserPlatform {
    pub(crate) fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_owned(),
            current: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PushPlatform for BrowserPlatform {
    async fn probe_ready(&self) -> std::result::Result<(), String> {
        Ok(())
    }

    async fn current_subscription(&self) -> nudge::Result<Option<PlatformSubscription>> {
        Ok(self.current.lock().unwrap().clone())
    }

    async fn subscribe(&self) -> nudge::Result<PlatformSubscription> {
        let mut current = self.current.lock().unwrap();
        let subscription = current
            .get_or_insert_with(|| PlatformSubscription {
                endpoint: self.endpoint.clone(),
                keys: keys(),
            })
            .clone();
        Ok(subscription)
    }

    async fn unsubscribe(&self) -> nudge::Result<()> {
        *self.current.lock().unwrap() = None;
        Ok(())
    }
}
