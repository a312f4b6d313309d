//! Client-side subscription lifecycle.
//!
//! [`SubscriptionManager`] is constructed explicitly and handed to whoever
//! needs it; it owns the cached subscription and serializes initialization so
//! several concurrent callers trigger exactly one platform round-trip.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::DeviceRegistry;
use crate::config::ClientConfig;
use crate::error::{NudgeError, Result};
use crate::model::{DeviceSubscription, PushKeys};

/// A subscription as issued by the local push platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformSubscription {
    pub endpoint: String,
    pub keys: PushKeys,
}

/// Local push manager (browser service worker registration, OS push API).
#[async_trait]
pub trait PushPlatform: Send + Sync {
    /// Readiness probe. `Err` carries the reason the platform is not ready yet.
    async fn probe_ready(&self) -> std::result::Result<(), String>;

    /// The subscription the platform currently holds, if any.
    async fn current_subscription(&self) -> Result<Option<PlatformSubscription>>;

    /// Create a new subscription.
    async fn subscribe(&self) -> Result<PlatformSubscription>;

    /// Drop the current subscription.
    async fn unsubscribe(&self) -> Result<()>;
}

/// The registry operations the client relies on.
#[async_trait]
pub trait SubscriptionRegistry: Send + Sync {
    async fn validate(&self, owner_id: &str, endpoint: &str) -> Result<bool>;

    async fn register(
        &self,
        owner_id: &str,
        endpoint: &str,
        keys: &PushKeys,
        label: &str,
    ) -> Result<DeviceSubscription>;

    async fn remove(&self, owner_id: &str, endpoint: &str) -> Result<bool>;
}

#[async_trait]
impl SubscriptionRegistry for DeviceRegistry {
    async fn validate(&self, owner_id: &str, endpoint: &str) -> Result<bool> {
        DeviceRegistry::validate(self, owner_id, endpoint)
    }

    async fn register(
        &self,
        owner_id: &str,
        endpoint: &str,
        keys: &PushKeys,
        label: &str,
    ) -> Result<DeviceSubscription> {
        DeviceRegistry::register(self, owner_id, endpoint, keys, label)
    }

    async fn remove(&self, owner_id: &str, endpoint: &str) -> Result<bool> {
        DeviceRegistry::remove(self, owner_id, endpoint)
    }
}

/// Owns one device's subscription for one user.
pub struct SubscriptionManager {
    owner_id: String,
    device_label: String,
    platform: Arc<dyn PushPlatform>,
    registry: Arc<dyn SubscriptionRegistry>,
    config: ClientConfig,
    /// Held across initialization so concurrent callers share one attempt.
    state: Mutex<Option<DeviceSubscription>>,
}

impl SubscriptionManager {
    pub fn new(
        owner_id: impl Into<String>,
        device_label: impl Into<String>,
        platform: Arc<dyn PushPlatform>,
        registry: Arc<dyn SubscriptionRegistry>,
        config: ClientConfig,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            device_label: device_label.into(),
            platform,
            registry,
            config,
            state: Mutex::new(None),
        }
    }

    /// The registered subscription, if initialization has completed.
    pub async fn current(&self) -> Option<DeviceSubscription> {
        self.state.lock().await.clone()
    }

    /// Wait for the platform, then make sure this device is registered.
    ///
    /// A completed registration is reused. Callers racing on a fresh manager
    /// queue behind the first one and then observe its result.
    ///
    /// # Errors
    ///
    /// [`NudgeError::NotReady`] when the platform never becomes ready within
    /// the configured attempt budget; registry or platform errors otherwise.
    pub async fn initialize(&self) -> Result<DeviceSubscription> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.as_ref() {
            return Ok(existing.clone());
        }

        self.wait_until_ready().await?;
        let subscription = self.ensure_registered(state.as_ref()).await?;
        *state = Some(subscription.clone());
        Ok(subscription)
    }

    /// Re-run validation against the registry, replacing a stale subscription.
    pub async fn refresh(&self) -> Result<DeviceSubscription> {
        let mut state = self.state.lock().await;
        let subscription = self.ensure_registered(state.as_ref()).await?;
        *state = Some(subscription.clone());
        Ok(subscription)
    }

    /// Unsubscribe locally, remove the registry row and clear the cache.
    pub async fn reset(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(current) = self.platform.current_subscription().await? {
            self.registry
                .remove(&self.owner_id, &current.endpoint)
                .await?;
            self.platform.unsubscribe().await?;
        }
        if let Some(cached) = state.take() {
            self.registry.remove(&self.owner_id, &cached.endpoint).await?;
        }
        info!(owner_id = %self.owner_id, "push subscription reset");
        Ok(())
    }

    async fn wait_until_ready(&self) -> Result<()> {
        let max_attempts = self.config.ready_max_attempts.max(1);
        let mut last_reason = String::new();

        for attempt in 0..max_attempts {
            match self.platform.probe_ready().await {
                Ok(()) => {
                    if attempt > 0 {
                        debug!(attempt, "push platform became ready");
                    }
                    return Ok(());
                }
                Err(reason) => {
                    debug!(attempt, %reason, "push platform not ready");
                    last_reason = reason;
                    if attempt + 1 < max_attempts {
                        tokio::time::sleep(self.backoff_delay(attempt)).await;
                    }
                }
            }
        }

        warn!(attempts = max_attempts, reason = %last_reason, "push platform never became ready");
        Err(NudgeError::NotReady {
            attempts: max_attempts,
            reason: last_reason,
        })
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.min(63);
        let multiplier = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
        let delay_ms = self
            .config
            .ready_initial_delay_ms
            .saturating_mul(multiplier)
            .min(self.config.ready_max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    async fn ensure_registered(
        &self,
        cached: Option<&DeviceSubscription>,
    ) -> Result<DeviceSubscription> {
        let current = self.platform.current_subscription().await?;

        // A cached endpoint the platform no longer holds is dead on this device.
        if let Some(cached) = cached {
            let still_held = current
                .as_ref()
                .is_some_and(|c| c.endpoint == cached.endpoint);
            if !still_held {
                info!(owner_id = %self.owner_id, "dropping registration the platform no longer holds");
                self.registry.remove(&self.owner_id, &cached.endpoint).await?;
            }
        }

        if let Some(current) = current {
            if self.registry.validate(&self.owner_id, &current.endpoint).await? {
                debug!(owner_id = %self.owner_id, "reusing validated push subscription");
                return self.register(&current).await;
            }
            warn!(owner_id = %self.owner_id, "local push subscription unknown to registry, resubscribing");
            self.platform.unsubscribe().await?;
        }

        let fresh = self.platform.subscribe().await?;
        self.register(&fresh).await
    }

    async fn register(&self, subscription: &PlatformSubscription) -> Result<DeviceSubscription> {
        self.registry
            .register(
                &self.owner_id,
                &subscription.endpoint,
                &subscription.keys,
                &self.device_label,
            )
            .await
    }
}
