//! Cross-context request/response channel between the background dispatcher
//! and the foreground context that owns the fresh snapshot.
//!
//! The dispatcher asks with [`SyncMessage::RequestPendingReminders`] and the
//! foreground answers with [`SyncMessage::PendingRemindersResponse`]. A request
//! that is not answered in time resolves to "absent" and never hangs.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{NudgeError, Result};
use crate::model::LocalSnapshot;

/// Default bound on how long a requester waits for an answer.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(2);

/// Wire messages of the sync protocol.
///
/// Serialized as `{"type": "REQUEST_PENDING_REMINDERS"}` and
/// `{"type": "PENDING_REMINDERS_RESPONSE", "snapshot": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncMessage {
    RequestPendingReminders,
    PendingRemindersResponse {
        #[serde(default)]
        snapshot: Option<LocalSnapshot>,
    },
}

impl SyncMessage {
    /// Parse a raw message, e.g. one relayed between contexts as text.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

struct SyncEnvelope {
    message: SyncMessage,
    reply_tx: oneshot::Sender<SyncMessage>,
}

/// Dispatcher side of the channel.
#[derive(Clone)]
pub struct SyncRequester {
    request_tx: mpsc::Sender<SyncEnvelope>,
}

impl SyncRequester {
    /// Ask the foreground for its current snapshot.
    ///
    /// Returns `None` when the foreground is gone, does not answer within
    /// `timeout`, or has nothing cached.
    pub async fn request_pending(&self, timeout: Duration) -> Option<LocalSnapshot> {
        match tokio::time::timeout(timeout, self.exchange(SyncMessage::RequestPendingReminders))
            .await
        {
            Ok(Ok(SyncMessage::PendingRemindersResponse { snapshot })) => snapshot,
            Ok(Ok(other)) => {
                debug!(?other, "unexpected sync reply");
                None
            }
            Ok(Err(e)) => {
                debug!("sync request failed: {e}");
                None
            }
            Err(_) => {
                debug!(timeout_ms = timeout.as_millis() as u64, "sync request timed out");
                None
            }
        }
    }

    async fn exchange(&self, message: SyncMessage) -> Result<SyncMessage> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request_tx
            .send(SyncEnvelope { message, reply_tx })
            .await
            .map_err(|e| NudgeError::Channel(format!("failed to send sync request: {e}")))?;
        reply_rx
            .await
            .map_err(|e| NudgeError::Channel(format!("sync reply dropped: {e}")))
    }
}

/// Foreground side of the channel.
pub struct SyncResponder {
    request_rx: mpsc::Receiver<SyncEnvelope>,
}

impl SyncResponder {
    /// Wait for the next request. `None` once every requester is dropped.
    pub async fn recv(&mut self) -> Option<PendingSyncRequest> {
        self.request_rx
            .recv()
            .await
            .map(|envelope| PendingSyncRequest { envelope })
    }
}

/// A request awaiting its answer.
pub struct PendingSyncRequest {
    envelope: SyncEnvelope,
}

impl PendingSyncRequest {
    pub fn message(&self) -> &SyncMessage {
        &self.envelope.message
    }

    /// Answer with `snapshot`. A requester that already gave up is ignored.
    pub fn respond(self, snapshot: Option<LocalSnapshot>) {
        let reply = match self.envelope.message {
            SyncMessage::RequestPendingReminders => {
                SyncMessage::PendingRemindersResponse { snapshot }
            }
            SyncMessage::PendingRemindersResponse { .. } => {
                SyncMessage::PendingRemindersResponse { snapshot: None }
            }
        };
        let _ = self.envelope.reply_tx.send(reply);
    }
}

/// Create a connected requester/responder pair.
#[must_use]
pub fn sync_channel(capacity: usize) -> (SyncRequester, SyncResponder) {
    let (request_tx, request_rx) = mpsc::channel(capacity.max(1));
    (SyncRequester { request_tx }, SyncResponder { request_rx })
}
