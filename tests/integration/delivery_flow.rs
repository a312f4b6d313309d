//! Trigger sweeps end to end: store → claim → gateway fan-out → sent flag.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use nudge::config::{PushConfig, TriggerConfig};
use nudge::model::NewReminder;
use nudge::registry::DeviceRegistry;
use nudge::transport::{GatewayPushTransport, PushTransport};
use nudge::trigger::{DeliveryTrigger, SweepSummary};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{keys, t0, temp_store};

const LAPTOP: &str = "https://fcm.googleapis.com/fcm/send/laptop-token";
const PHONE: &str = "https://updates.push.services.mozilla.com/wpush/v2/phone-token";

async fn gateway(phone_status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/push"))
        .and(body_partial_json(json!({"subscription": {"endpoint": PHONE}})))
        .respond_with(ResponseTemplate::new(phone_status))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/push"))
        .and(body_partial_json(json!({"subscription": {"endpoint": LAPTOP}})))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;
    server
}

fn transport(server: &MockServer) -> Arc<dyn PushTransport> {
    Arc::new(
        GatewayPushTransport::new(&PushConfig {
            gateway_url: server.uri(),
            gateway_token: None,
            request_timeout_secs: 5,
            message_ttl_secs: 600,
        })
        .expect("transport"),
    )
}

#[tokio::test]
async fn two_device_sweep_delivers_to_both() {
    let (store, _dir) = temp_store();
    let registry = DeviceRegistry::new(Arc::clone(&store));
    registry.register_at("alice", LAPTOP, &keys(), "laptop", t0()).expect("laptop");
    registry.register_at("alice", PHONE, &keys(), "phone", t0()).expect("phone");
    let reminder = store
        .create_reminder(NewReminder::new("alice", "dentist at 3", t0() - Duration::seconds(10)))
        .expect("reminder");

    let server = gateway(201).await;
    let trigger = DeliveryTrigger::new(Arc::clone(&store), transport(&server), &TriggerConfig::default());
    let summary = trigger.sweep(t0()).await.expect("sweep");

    assert_eq!(
        summary,
        SweepSummary {
            processed: 1,
            delivered: 2,
            ..SweepSummary::default()
        }
    );
    assert!(store.get_reminder(&reminder.id).expect("get").expect("exists").sent);

    let requests = server.received_requests().await.expect("recorded");
    assert_eq!(requests.len(), 2);
    for request in &requests {
        let body: serde_json::Value = serde_json::from_slice(&request.body).expect("json body");
        let payload: serde_json::Value =
            serde_json::from_str(body["payload"].as_str().expect("payload string")).expect("payload");
        assert_eq!(payload["reminder_id"], reminder.id.as_str());
        assert_eq!(payload["body"], "dentist at 3");
    }

    // A second sweep finds nothing left to send.
    let again = trigger.sweep(t0() + Duration::minutes(1)).await.expect("sweep");
    assert_eq!(again, SweepSummary::default());
    assert_eq!(server.received_requests().await.expect("recorded").len(), 2);
}

#[tokio::test]
async fn expired_phone_is_pruned_while_laptop_still_receives() {
    let (store, _dir) = temp_store();
    let registry = DeviceRegistry::new(Arc::clone(&store));
    registry.register_at("alice", LAPTOP, &keys(), "laptop", t0()).expect("laptop");
    registry.register_at("alice", PHONE, &keys(), "phone", t0()).expect("phone");
    let reminder = store
        .create_reminder(NewReminder::new("alice", "standup", t0()))
        .expect("reminder");

    let server = gateway(410).await;
    let trigger = DeliveryTrigger::new(Arc::clone(&store), transport(&server), &TriggerConfig::default());
    let summary = trigger.sweep(t0()).await.expect("sweep");

    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.pruned, 1);
    let remaining: Vec<String> = registry
        .list("alice")
        .expect("list")
        .into_iter()
        .map(|s| s.endpoint)
        .collect();
    assert_eq!(remaining, vec![LAPTOP.to_owned()]);
    assert!(store.get_reminder(&reminder.id).expect("get").expect("exists").sent);
}

#[tokio::test]
async fn overlapping_sweeps_deliver_each_reminder_once() {
    let (store, _dir) = temp_store();
    let registry = DeviceRegistry::new(Arc::clone(&store));
    registry.register_at("alice", LAPTOP, &keys(), "laptop", t0()).expect("laptop");
    for i in 0..20 {
        store
            .create_reminder(NewReminder::new(
                "alice",
                format!("task {i}"),
                t0() - Duration::seconds(i),
            ))
            .expect("reminder");
    }

    let server = gateway(201).await;
    let config = TriggerConfig::default();
    let first = DeliveryTrigger::new(Arc::clone(&store), transport(&server), &config)
        .with_instance_id("sweep-a");
    let second = DeliveryTrigger::new(Arc::clone(&store), transport(&server), &config)
        .with_instance_id("sweep-b");

    let (a, b) = tokio::join!(first.sweep(t0()), second.sweep(t0()));
    let (a, b) = (a.expect("sweep a"), b.expect("sweep b"));

    assert_eq!(a.processed + b.processed, 20);
    assert_eq!(a.delivered + b.delivered, 20);
    assert_eq!(server.received_requests().await.expect("recorded").len(), 20);
    assert!(store.due_unsent(t0(), 100).expect("due").is_empty());
}

#[tokio::test]
async fn sweep_slower_than_claim_ttl_is_not_overtaken() {
    let (store, _dir) = temp_store();
    let registry = DeviceRegistry::new(Arc::clone(&store));
    registry.register_at("alice", LAPTOP, &keys(), "laptop", t0()).expect("laptop");
    let first = store
        .create_reminder(NewReminder::new("alice", "first", t0() - Duration::seconds(2)))
        .expect("first");
    let second = store
        .create_reminder(NewReminder::new("alice", "second", t0() - Duration::seconds(1)))
        .expect("second");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/push"))
        .respond_with(ResponseTemplate::new(201).set_delay(StdDuration::from_millis(1_200)))
        .mount(&server)
        .await;

    // Each push outlasts the claim TTL.
    let config = TriggerConfig {
        claim_ttl_secs: 1,
        ..TriggerConfig::default()
    };
    let slow = DeliveryTrigger::new(Arc::clone(&store), transport(&server), &config)
        .with_instance_id("sweep-a");
    let overlapping = DeliveryTrigger::new(Arc::clone(&store), transport(&server), &config)
        .with_instance_id("sweep-b");

    let slow_task = tokio::spawn(async move { slow.sweep(t0()).await });
    // Land inside the second reminder's fan-out.
    tokio::time::sleep(StdDuration::from_millis(1_500)).await;
    let overlap = overlapping
        .sweep(t0() + Duration::milliseconds(1_500))
        .await
        .expect("overlapping sweep");
    let slow_summary = slow_task.await.expect("joined").expect("slow sweep");

    assert_eq!(slow_summary.processed, 2);
    assert_eq!(overlap.processed, 0);
    assert_eq!(overlap.contended, 1);
    assert_eq!(server.received_requests().await.expect("recorded").len(), 2);
    for id in [&first.id, &second.id] {
        assert!(store.get_reminder(id).expect("get").expect("exists").sent);
    }
}

#[tokio::test]
async fn gateway_outage_still_marks_sent_and_keeps_devices() {
    let (store, _dir) = temp_store();
    let registry = DeviceRegistry::new(Arc::clone(&store));
    registry.register_at("alice", PHONE, &keys(), "phone", t0()).expect("phone");
    let reminder = store
        .create_reminder(NewReminder::new("alice", "call back", t0()))
        .expect("reminder");

    let server = gateway(503).await;
    let trigger = DeliveryTrigger::new(Arc::clone(&store), transport(&server), &TriggerConfig::default());
    let summary = trigger.sweep(t0()).await.expect("sweep");

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.pruned, 0);
    assert_eq!(registry.list("alice").expect("list").len(), 1);
    assert!(store.get_reminder(&reminder.id).expect("get").expect("exists").sent);
}
