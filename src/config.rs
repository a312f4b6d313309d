//! Configuration types for the reminder delivery subsystem.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{NudgeError, Result};

/// The fallback cache must look at least this many dispatcher polling
/// intervals ahead so a reminder due during a suspension is still cached.
pub const MIN_LOOKAHEAD_TO_FALLBACK_RATIO: u64 = 6;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NudgeConfig {
    /// Reminder / subscription database.
    pub store: StoreConfig,
    /// Foreground fallback cache.
    pub cache: CacheConfig,
    /// Background notification dispatcher.
    pub dispatcher: DispatcherConfig,
    /// Server-side delivery trigger and its HTTP endpoint.
    pub trigger: TriggerConfig,
    /// Push gateway used for outbound delivery.
    pub push: PushConfig,
    /// Client-side subscription initialization.
    pub client: ClientConfig,
}

/// Database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file.
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: crate::nudge_dirs::database_file(),
        }
    }
}

/// Local fallback cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding the durable snapshot file.
    pub dir: PathBuf,
    /// How far ahead of `now` reminders are captured (seconds).
    pub lookahead_secs: u64,
    /// Foreground refresh interval (seconds).
    pub refresh_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: crate::nudge_dirs::cache_dir(),
            lookahead_secs: 24 * 3600,
            refresh_interval_secs: 60,
        }
    }
}

/// Notification dispatcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Fallback cache check interval (seconds).
    pub fallback_interval_secs: u64,
    /// How long past `due_time` the fallback path still renders (seconds).
    pub fallback_window_secs: u64,
    /// Bounded wait for a sync-channel response (milliseconds).
    pub sync_timeout_ms: u64,
    /// Title used when a push payload cannot be parsed.
    pub generic_title: String,
    /// Body used when a push payload cannot be parsed.
    pub generic_body: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            fallback_interval_secs: 60,
            fallback_window_secs: 60 * 60,
            sync_timeout_ms: u64::try_from(crate::sync::DEFAULT_SYNC_TIMEOUT.as_millis())
                .unwrap_or(u64::MAX),
            generic_title: "Reminder".to_owned(),
            generic_body: "You have a reminder due.".to_owned(),
        }
    }
}

/// Remote delivery trigger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Interval between scheduled sweeps (seconds). `0` disables the loop.
    pub sweep_interval_secs: u64,
    /// Lifetime of a per-reminder claim (seconds).
    pub claim_ttl_secs: u64,
    /// Maximum reminders examined per sweep.
    pub batch_size: usize,
    /// HTTP bind host for the trigger endpoint.
    pub host: String,
    /// HTTP bind port (0 = auto-assign).
    pub port: u16,
    /// Bearer token required by `POST /trigger/sweep`. Unset rejects all calls.
    pub bearer_token: Option<String>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            claim_ttl_secs: 60,
            batch_size: 200,
            host: "127.0.0.1".to_owned(),
            port: 4090,
            bearer_token: None,
        }
    }
}

/// Push gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Base URL of the push gateway that encrypts and forwards Web Push messages.
    pub gateway_url: String,
    /// Optional bearer token for the gateway.
    pub gateway_token: Option<String>,
    /// Per-request timeout (seconds).
    pub request_timeout_secs: u64,
    /// Time-to-live the push service should hold an undelivered message (seconds).
    pub message_ttl_secs: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            gateway_url: "http://127.0.0.1:4091".to_owned(),
            gateway_token: None,
            request_timeout_secs: 10,
            message_ttl_secs: 3600,
        }
    }
}

/// Client-side readiness backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Maximum readiness probes before giving up.
    pub ready_max_attempts: u32,
    /// Initial delay between probes (milliseconds); doubles each attempt.
    pub ready_initial_delay_ms: u64,
    /// Upper bound on a single delay (milliseconds).
    pub ready_max_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ready_max_attempts: 6,
            ready_initial_delay_ms: 250,
            ready_max_delay_ms: 5_000,
        }
    }
}

impl NudgeConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| NudgeError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| NudgeError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path (`config.toml` under the platform config dir).
    pub fn default_config_path() -> PathBuf {
        crate::nudge_dirs::config_file()
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`NudgeError::Config`] describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.cache.refresh_interval_secs == 0 {
            return Err(NudgeError::Config(
                "cache.refresh_interval_secs must be > 0".to_owned(),
            ));
        }
        if self.dispatcher.fallback_interval_secs == 0 {
            return Err(NudgeError::Config(
                "dispatcher.fallback_interval_secs must be > 0".to_owned(),
            ));
        }
        let min_lookahead = self
            .dispatcher
            .fallback_interval_secs
            .saturating_mul(MIN_LOOKAHEAD_TO_FALLBACK_RATIO);
        if self.cache.lookahead_secs < min_lookahead {
            return Err(NudgeError::Config(format!(
                "cache.lookahead_secs ({}) must be at least {}x dispatcher.fallback_interval_secs ({})",
                self.cache.lookahead_secs,
                MIN_LOOKAHEAD_TO_FALLBACK_RATIO,
                self.dispatcher.fallback_interval_secs
            )));
        }
        if self.trigger.claim_ttl_secs == 0 {
            return Err(NudgeError::Config(
                "trigger.claim_ttl_secs must be > 0".to_owned(),
            ));
        }
        if self.trigger.claim_ttl_secs <= self.push.request_timeout_secs {
            return Err(NudgeError::Config(format!(
                "trigger.claim_ttl_secs ({}) must exceed push.request_timeout_secs ({})",
                self.trigger.claim_ttl_secs, self.push.request_timeout_secs
            )));
        }
        if self.trigger.batch_size == 0 {
            return Err(NudgeError::Config(
                "trigger.batch_size must be > 0".to_owned(),
            ));
        }
        if self.dispatcher.sync_timeout_ms == 0 {
            return Err(NudgeError::Config(
                "dispatcher.sync_timeout_ms must be > 0".to_owned(),
            ));
        }
        Ok(())
    }
}
