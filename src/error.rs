//! Error types for the reminder delivery subsystem.

/// Top-level error type for nudge.
#[derive(Debug, thiserror::Error)]
pub enum NudgeError {
    /// Backing store read/write failure. Recoverable; callers may retry.
    #[error("store error: {0}")]
    Store(String),

    /// Push transport failure outside a single delivery attempt
    /// (client construction, gateway misconfiguration).
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Cross-context channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// A dependency never became ready within the retry budget.
    #[error("not ready after {attempts} attempts: {reason}")]
    NotReady {
        /// Attempts made before giving up.
        attempts: u32,
        /// Last observed failure.
        reason: String,
    },

    /// Platform push subscription failure on the client side.
    #[error("subscription error: {0}")]
    Subscription(String),

    /// JSON encoding/decoding error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for NudgeError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, NudgeError>;

/// Outcome of a single push delivery attempt that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The endpoint is no longer valid; its subscription should be removed.
    #[error("endpoint rejected ({status}): {detail}")]
    Rejected {
        /// HTTP status reported by the push service.
        status: u16,
        /// Response detail, truncated.
        detail: String,
    },

    /// Recoverable failure (timeout, rate limit, 5xx). Not retried within a sweep.
    #[error("transient delivery failure: {0}")]
    Transient(String),
}

impl DeliveryError {
    /// Returns `true` when the subscription should be deleted.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}
