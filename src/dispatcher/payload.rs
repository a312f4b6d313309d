//! Inbound push payload parsing.
//!
//! Push services and gateways wrap the message in different envelopes. Three
//! shapes are accepted:
//!
//! - flat: `{"title": .., "body": .., "reminder_id": ..}`
//! - data-nested: `{"data": {"title": .., "body": .., "reminder_id": ..}}`
//! - split: `{"notification": {"title": .., "body": ..}, "data": {"reminder_id": ..}}`
//!
//! Anything else renders as a generic notification.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A notification ready to be shown by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Reminder id used as the de-duplication tag. `None` for generic notifications.
    pub reminder_id: Option<String>,
}

impl Notification {
    pub fn generic(title: &str, body: &str) -> Self {
        Self {
            title: title.to_owned(),
            body: body.to_owned(),
            reminder_id: None,
        }
    }
}

/// Parse a raw push payload, filling gaps from `fallback`.
///
/// Returns `fallback` unchanged when the payload is not a JSON object or
/// carries neither a body nor a reminder id.
pub fn parse_push_payload(raw: &[u8], fallback: &Notification) -> Notification {
    let Ok(Value::Object(root)) = serde_json::from_slice::<Value>(raw) else {
        return fallback.clone();
    };

    let data = root.get("data").and_then(Value::as_object);
    let notification = root.get("notification").and_then(Value::as_object);

    let field = |name: &str| -> Option<String> {
        [notification, data, Some(&root)]
            .into_iter()
            .flatten()
            .find_map(|obj| obj.get(name).and_then(non_empty_str))
    };

    let reminder_id = field("reminder_id").or_else(|| field("reminderId"));
    let body = field("body");
    if body.is_none() && reminder_id.is_none() {
        return fallback.clone();
    }

    Notification {
        title: field("title").unwrap_or_else(|| fallback.title.clone()),
        body: body.unwrap_or_else(|| fallback.body.clone()),
        reminder_id,
    }
}

fn non_empty_str(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}
