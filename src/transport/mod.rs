//! Outbound push transport.
//!
//! The trigger talks to devices only through [`PushTransport`]; each attempt
//! either succeeds or fails with a [`DeliveryError`] that tells the caller
//! whether the subscription is dead (`Rejected`) or merely unreachable now
//! (`Transient`).

mod gateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;
use crate::model::{DeviceSubscription, Reminder};

pub use gateway::GatewayPushTransport;

/// Title used for reminder notifications.
pub const REMINDER_TITLE: &str = "Reminder";

/// Compact push payload carried to the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub reminder_id: String,
}

impl PushPayload {
    #[must_use]
    pub fn for_reminder(reminder: &Reminder) -> Self {
        Self {
            title: REMINDER_TITLE.to_owned(),
            body: reminder.text.clone(),
            reminder_id: reminder.id.clone(),
        }
    }
}

/// Delivers one payload to one device.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn deliver(
        &self,
        subscription: &DeviceSubscription,
        payload: &PushPayload,
    ) -> Result<(), DeliveryError>;
}

/// Classify a push-service HTTP status into a delivery outcome.
///
/// `404` and `410` mean the endpoint is gone for good; everything else that is
/// not a success is treated as transient so a misconfigured gateway never
/// wipes the registry.
pub fn classify_status(status: u16, detail: &str) -> Result<(), DeliveryError> {
    match status {
        200..=299 => Ok(()),
        404 | 410 => Err(DeliveryError::Rejected {
            status,
            detail: truncate_detail(detail),
        }),
        _ => Err(DeliveryError::Transient(format!(
            "HTTP {status}: {}",
            truncate_detail(detail)
        ))),
    }
}

fn truncate_detail(detail: &str) -> String {
    if detail.is_empty() {
        "no response body".to_owned()
    } else {
        detail.chars().take(500).collect()
    }
}
