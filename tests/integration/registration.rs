//! Device registration from several tabs and processes.

use std::sync::Arc;

use nudge::config::ClientConfig;
use nudge::registry::client::{PushPlatform, SubscriptionManager, SubscriptionRegistry};
use nudge::registry::{DeviceRegistry, RegistrySummary};
use nudge::store::Store;

use crate::helpers::{BrowserPlatform, keys, t0, temp_store};

const ENDPOINT: &str = "https://fcm.googleapis.com/fcm/send/tab-shared-token";

fn manager(
    platform: &Arc<BrowserPlatform>,
    registry: &Arc<DeviceRegistry>,
) -> SubscriptionManager {
    SubscriptionManager::new(
        "alice",
        "chrome",
        Arc::clone(platform) as Arc<dyn PushPlatform>,
        Arc::clone(registry) as Arc<dyn SubscriptionRegistry>,
        ClientConfig::default(),
    )
}

#[tokio::test]
async fn two_tabs_initializing_together_leave_one_row() {
    let (store, _dir) = temp_store();
    let registry = Arc::new(DeviceRegistry::new(store));
    let platform = Arc::new(BrowserPlatform::new(ENDPOINT));

    let tab_a = manager(&platform, &registry);
    let tab_b = manager(&platform, &registry);
    let (a, b) = tokio::join!(tab_a.initialize(), tab_b.initialize());
    let (a, b) = (a.expect("tab a"), b.expect("tab b"));

    assert_eq!(a.endpoint, ENDPOINT);
    assert_eq!(b.endpoint, ENDPOINT);
    let rows = registry.list("alice").expect("list");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        registry.summary("alice").expect("summary"),
        RegistrySummary {
            total: 1,
            unique_endpoints: 1,
            duplicates: 0
        }
    );
}

#[test]
fn concurrent_connections_register_one_row() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("nudge.db");
    // Create the schema once before the racers open their own connections.
    drop(Store::open(&db_path).expect("init"));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let db_path = db_path.clone();
            std::thread::spawn(move || {
                let registry = DeviceRegistry::new(Arc::new(Store::open(&db_path).expect("open")));
                registry
                    .register_at(
                        "alice",
                        ENDPOINT,
                        &keys(),
                        "chrome",
                        t0() + chrono::Duration::seconds(i),
                    )
                    .expect("register")
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("thread");
    }

    let registry = DeviceRegistry::new(Arc::new(Store::open(&db_path).expect("open")));
    let rows = registry.list("alice").expect("list");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].last_used_at, t0() + chrono::Duration::seconds(7));
}

#[test]
fn query_string_variants_collapse_after_deduplicate() {
    let (store, _dir) = temp_store();
    let registry = DeviceRegistry::new(store);
    registry
        .register_at("alice", &format!("{ENDPOINT}?refresh=1"), &keys(), "chrome", t0())
        .expect("first");
    registry
        .register_at(
            "alice",
            &format!("{ENDPOINT}?refresh=2"),
            &keys(),
            "chrome",
            t0() + chrono::Duration::minutes(1),
        )
        .expect("second");

    assert_eq!(registry.summary("alice").expect("summary").duplicates, 1);
    let report = registry.deduplicate("alice").expect("dedup");
    assert_eq!(report.deleted_count, 1);

    let rows = registry.list("alice").expect("list");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].endpoint, format!("{ENDPOINT}?refresh=2"));
    assert_eq!(registry.summary("alice").expect("summary").duplicates, 0);
}

#[tokio::test]
async fn reset_then_initialize_registers_again() {
    let (store, _dir) = temp_store();
    let registry = Arc::new(DeviceRegistry::new(store));
    let platform = Arc::new(BrowserPlatform::new(ENDPOINT));
    let tab = manager(&platform, &registry);

    tab.initialize().await.expect("init");
    tab.reset().await.expect("reset");
    assert!(registry.list("alice").expect("list").is_empty());
    assert!(tab.current().await.is_none());

    tab.initialize().await.expect("re-init");
    assert_eq!(registry.list("alice").expect("list").len(), 1);
}
