//! Pause tokens and the pause-resume lifecycle, generalized from the
//! teacher's `interrupt::InterruptState`/`InterruptTracker` (before/after
//! breakpoints keyed by thread id) to a single `PauseToken` issued whenever
//! a `Pause` node suspends an execution, with a TTL and idempotent resume.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PauseError {
    #[error("pause token {0} not found")]
    NotFound(Uuid),
    #[error("pause token {0} already resumed")]
    AlreadyResumed(Uuid),
    #[error("pause token {0} timed out waiting for resume")]
    PauseTimeout(Uuid),
}

/// A handed-out token identifying one suspended execution, waiting either
/// for an external `resume()` call or its TTL to expire.
#[derive(Debug, Clone)]
pub struct PauseToken {
    pub id: Uuid,
    /// The execution this pause belongs to, so a background sweep that finds
    /// an expired token can tell the owning stream which execution to fail.
    pub execution_id: Uuid,
    pub node: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub ttl: std::time::Duration,
}

impl PauseToken {
    pub fn is_expired(&self) -> bool {
        Utc::now() - self.created_at
            > chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero())
    }
}

struct PendingPause {
    token: PauseToken,
    resumer: Option<oneshot::Sender<serde_json::Value>>,
}

/// Tracks outstanding pauses for one runtime. `resume()` is idempotent: a
/// second call for the same token returns `AlreadyResumed` rather than
/// panicking or silently no-oping, so callers racing a resume can tell
/// which one actually woke the execution.
#[derive(Default)]
pub struct PauseRegistry {
    pending: Arc<Mutex<HashMap<Uuid, PendingPause>>>,
}

impl PauseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new token and a receiver the executor awaits for resume. The
    /// receiver is not blocked on by the executor (pauses are non-blocking,
    /// §4.6) — it exists only so a resume dispatched after the owning task
    /// has already returned still has somewhere harmless to send into.
    pub async fn suspend(
        &self,
        execution_id: Uuid,
        node: impl Into<String>,
        reason: impl Into<String>,
        ttl: std::time::Duration,
    ) -> (PauseToken, oneshot::Receiver<serde_json::Value>) {
        let token = PauseToken {
            id: Uuid::new_v4(),
            execution_id,
            node: node.into(),
            reason: reason.into(),
            created_at: Utc::now(),
            ttl,
        };
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(
            token.id,
            PendingPause {
                token: token.clone(),
                resumer: Some(tx),
            },
        );
        (token, rx)
    }

    pub async fn resume(&self, id: Uuid, value: serde_json::Value) -> Result<(), PauseError> {
        let mut guard = self.pending.lock().await;
        let pending = guard.get_mut(&id).ok_or(PauseError::NotFound(id))?;
        let sender = pending.resumer.take().ok_or(PauseError::AlreadyResumed(id))?;
        let _ = sender.send(value);
        Ok(())
    }

    pub async fn cancel(&self, id: Uuid) -> Result<(), PauseError> {
        let mut guard = self.pending.lock().await;
        guard.remove(&id).ok_or(PauseError::NotFound(id))?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Option<PauseToken> {
        self.pending.lock().await.get(&id).map(|p| p.token.clone())
    }

    /// Drop any tokens past their TTL, returning the expired ids so the
    /// caller can fail the corresponding executions with `PauseTimeout`.
    pub async fn sweep_expired(&self) -> Vec<Uuid> {
        let mut guard = self.pending.lock().await;
        let expired: Vec<Uuid> = guard
            .values()
            .filter(|p| p.token.is_expired())
            .map(|p| p.token.id)
            .collect();
        for id in &expired {
            guard.remove(id);
        }
        expired
    }
}
