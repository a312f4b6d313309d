//! Foreground cache + background dispatcher working together.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use nudge::cache::{DurableSnapshot, FallbackCache, FallbackPoller, ReminderSource, SNAPSHOT_FILE_NAME};
use nudge::config::{CacheConfig, DispatcherConfig};
use nudge::dispatcher::{DeliveryState, NotificationDispatcher, NotificationSink};
use nudge::model::NewReminder;
use nudge::sync::sync_channel;
use tokio_util::sync::CancellationToken;

use crate::helpers::{RecordingSink, t0, temp_store};

fn cache_config(dir: &std::path::Path) -> CacheConfig {
    CacheConfig {
        dir: dir.to_path_buf(),
        ..CacheConfig::default()
    }
}

#[tokio::test]
async fn corrupted_durable_store_is_repaired_on_next_refresh() {
    let (store, _db_dir) = temp_store();
    let cache_dir = tempfile::tempdir().expect("cache dir");
    std::fs::write(cache_dir.path().join(SNAPSHOT_FILE_NAME), b"\x7f\x00garbage").expect("corrupt");

    let sink = Arc::new(RecordingSink::default());
    let (mut dispatcher, _handle) = NotificationDispatcher::new(
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
        DurableSnapshot::in_dir(cache_dir.path()),
        &DispatcherConfig::default(),
        CancellationToken::new(),
    );

    // Corrupted copy reads as absent; nothing renders and nothing panics.
    let report = dispatcher.fallback_tick(t0()).await;
    assert_eq!(report.rendered, 0);
    assert!(sink.shown().is_empty());

    let reminder = store
        .create_reminder(NewReminder::new("alice", "water plants", t0() + Duration::minutes(2)))
        .expect("reminder");
    let cache = FallbackCache::new(
        Arc::clone(&store) as Arc<dyn ReminderSource>,
        &cache_config(cache_dir.path()),
    );
    cache.refresh("alice", t0()).expect("refresh");

    let report = dispatcher.fallback_tick(t0() + Duration::minutes(3)).await;
    assert_eq!(report.rendered, 1);
    assert_eq!(sink.shown()[0].reminder_id.as_deref(), Some(reminder.id.as_str()));
    assert_eq!(sink.shown()[0].body, "water plants");
}

#[tokio::test]
async fn background_dispatcher_renders_from_foreground_snapshot() {
    let (store, _db_dir) = temp_store();
    let cache_dir = tempfile::tempdir().expect("cache dir");
    let reminder = store
        .create_reminder(NewReminder::new(
            "alice",
            "leave for airport",
            Utc::now() + Duration::milliseconds(300),
        ))
        .expect("reminder");

    let config = cache_config(cache_dir.path());
    let cache = Arc::new(FallbackCache::new(
        Arc::clone(&store) as Arc<dyn ReminderSource>,
        &config,
    ));
    let (requester, responder) = sync_channel(8);
    let cancel = CancellationToken::new();

    let poller = FallbackPoller::new(Arc::clone(&cache), "alice", &config, cancel.child_token())
        .with_sync_responder(responder);
    let poller_task = tokio::spawn(poller.run());

    // Wait for the initial refresh to land.
    let deadline = tokio::time::Instant::now() + StdDuration::from_secs(5);
    while cache.read().is_none() {
        assert!(tokio::time::Instant::now() < deadline, "initial refresh never ran");
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }

    let sink = Arc::new(RecordingSink::default());
    let (mut dispatcher, _handle) = NotificationDispatcher::new(
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
        DurableSnapshot::in_dir(cache_dir.path()),
        &DispatcherConfig::default(),
        cancel.child_token(),
    );
    dispatcher = dispatcher.with_sync_requester(requester);

    tokio::time::sleep(StdDuration::from_millis(400)).await;
    let report = dispatcher.fallback_tick(Utc::now()).await;
    assert!(report.from_sync);
    assert_eq!(report.rendered, 1);
    assert_eq!(dispatcher.ledger().state(&reminder.id), DeliveryState::Delivered);

    // The dispatcher never marks reminders sent; that is the trigger's job.
    assert!(!store.get_reminder(&reminder.id).expect("get").expect("exists").sent);

    cancel.cancel();
    tokio::time::timeout(StdDuration::from_secs(2), poller_task)
        .await
        .expect("poller stopped")
        .expect("poller joined");
}

#[tokio::test]
async fn push_and_fallback_for_same_reminder_render_once() {
    let (store, _db_dir) = temp_store();
    let cache_dir = tempfile::tempdir().expect("cache dir");
    let reminder = store
        .create_reminder(NewReminder::new("alice", "stretch", t0() + Duration::seconds(30)))
        .expect("reminder");
    FallbackCache::new(
        Arc::clone(&store) as Arc<dyn ReminderSource>,
        &cache_config(cache_dir.path()),
    )
    .refresh("alice", t0())
    .expect("refresh");

    let sink = Arc::new(RecordingSink::default());
    let (mut dispatcher, _handle) = NotificationDispatcher::new(
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
        DurableSnapshot::in_dir(cache_dir.path()),
        &DispatcherConfig::default(),
        CancellationToken::new(),
    );

    let push = serde_json::json!({
        "title": "Reminder",
        "body": "stretch",
        "reminder_id": reminder.id,
    })
    .to_string();
    let due = t0() + Duration::seconds(31);
    dispatcher.handle_push(push.as_bytes(), due).await;
    dispatcher.fallback_tick(due).await;
    dispatcher.fallback_tick(due + Duration::minutes(1)).await;

    assert_eq!(sink.shown().len(), 1);
}

#[tokio::test]
async fn reminder_renders_after_foreground_refreshes_past_its_due_time() {
    let (store, _db_dir) = temp_store();
    let cache_dir = tempfile::tempdir().expect("cache dir");
    let due = t0();
    let reminder = store
        .create_reminder(NewReminder::new("alice", "take the bread out", due))
        .expect("reminder");
    let cache = Arc::new(FallbackCache::new(
        Arc::clone(&store) as Arc<dyn ReminderSource>,
        &cache_config(cache_dir.path()),
    ));

    // Foreground answers sync requests from whatever it last captured.
    let (requester, mut responder) = sync_channel(8);
    let foreground = Arc::clone(&cache);
    tokio::spawn(async move {
        while let Some(request) = responder.recv().await {
            request.respond(foreground.read());
        }
    });

    let sink = Arc::new(RecordingSink::default());
    let (dispatcher, _handle) = NotificationDispatcher::new(
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
        DurableSnapshot::in_dir(cache_dir.path()),
        &DispatcherConfig::default(),
        CancellationToken::new(),
    );
    let mut dispatcher = dispatcher.with_sync_requester(requester);

    cache.refresh("alice", due - Duration::seconds(10)).expect("refresh");
    assert_eq!(dispatcher.fallback_tick(due - Duration::seconds(5)).await.rendered, 0);

    let later = cache.refresh("alice", due + Duration::seconds(50)).expect("refresh");
    assert!(later.reminders.is_empty());
    let report = dispatcher.fallback_tick(due + Duration::seconds(55)).await;
    assert!(report.from_sync);
    assert_eq!(report.rendered, 1);
    dispatcher.fallback_tick(due + Duration::minutes(30)).await;

    let shown = sink.shown();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].reminder_id.as_deref(), Some(reminder.id.as_str()));
}
