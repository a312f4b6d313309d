use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::{PushPayload, PushTransport, classify_status};
use crate::config::PushConfig;
use crate::error::{DeliveryError, NudgeError, Result};
use crate::model::{DeviceSubscription, PushKeys};

/// Path on the gateway that accepts push requests.
const PUSH_PATH: &str = "/v1/push";

#[derive(Serialize)]
struct GatewaySubscription<'a> {
    endpoint: &'a str,
    keys: &'a PushKeys,
}

#[derive(Serialize)]
struct GatewayRequest<'a> {
    subscription: GatewaySubscription<'a>,
    /// JSON-encoded [`PushPayload`]; the gateway encrypts it under `keys`.
    payload: String,
    ttl: u64,
    urgency: &'static str,
}

/// [`PushTransport`] that hands messages to a Web Push gateway over HTTP.
///
/// The gateway performs payload encryption and VAPID signing, then relays the
/// push service's status code back to us unchanged.
pub struct GatewayPushTransport {
    push_url: String,
    token: Option<String>,
    ttl_secs: u64,
    client: reqwest::Client,
}

impl GatewayPushTransport {
    /// Build a transport from config.
    ///
    /// # Errors
    ///
    /// Returns [`NudgeError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: &PushConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| NudgeError::Transport(format!("cannot build push client: {e}")))?;
        Ok(Self {
            push_url: format!("{}{PUSH_PATH}", config.gateway_url.trim_end_matches('/')),
            token: config.gateway_token.clone(),
            ttl_secs: config.message_ttl_secs,
            client,
        })
    }
}

#[async_trait]
impl PushTransport for GatewayPushTransport {
    async fn deliver(
        &self,
        subscription: &DeviceSubscription,
        payload: &PushPayload,
    ) -> std::result::Result<(), DeliveryError> {
        let payload = serde_json::to_string(payload)
            .map_err(|e| DeliveryError::Transient(format!("cannot encode payload: {e}")))?;
        let body = GatewayRequest {
            subscription: GatewaySubscription {
                endpoint: &subscription.endpoint,
                keys: &subscription.keys,
            },
            payload,
            ttl: self.ttl_secs,
            urgency: "high",
        };

        let mut request = self.client.post(&self.push_url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DeliveryError::Transient("push gateway timed out".to_owned())
            } else {
                DeliveryError::Transient(format!("push gateway unreachable: {e}"))
            }
        })?;

        let status = response.status().as_u16();
        if response.status().is_success() {
            debug!(status, "push accepted");
            return Ok(());
        }
        let detail = response.text().await.unwrap_or_default();
        classify_status(status, &detail)
    }
}
