//! `ExecutionRecord`: the runtime's bookkeeping entry for one triggered
//! execution, independent of its trace. Tracks the pending → running →
//! (paused | completed | failed | cancelled) → pruned state machine.

use chrono::{DateTime, Utc};
use runtime_graph::error::ExecutionFailure;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Pruned,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::Failed
                | ExecutionStatus::Cancelled
                | ExecutionStatus::Pruned
        )
    }

    /// Valid next states from this one, per the state machine's invariant
    /// that a record never regresses (e.g. completed never goes back to running).
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Running)
                | (Paused, Cancelled)
                | (Paused, Failed)
                | (Completed, Pruned)
                | (Failed, Pruned)
                | (Cancelled, Pruned)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: Uuid,
    pub stream_id: String,
    pub graph_name: String,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pause_token: Option<Uuid>,
    /// The node that raised the current (or most recent) pause, so a
    /// pause-timeout sweep can build a useful failure message after
    /// `PauseRegistry::sweep_expired` has already dropped the token itself.
    pub paused_node: Option<String>,
    /// The payload the caller triggered this execution with (§3: "trigger
    /// payload"). Kept on the record so `get_result` can show what an
    /// execution was asked to do alongside what it produced.
    pub trigger_payload: Value,
    /// Populated once `status` reaches `Completed`: the execution's full
    /// accumulated private-scope state at the moment it hit `END`.
    pub result: Option<Value>,
    /// Populated once `status` reaches `Failed`: the structured failure that
    /// ended the execution.
    pub error: Option<ExecutionFailure>,
}

impl ExecutionRecord {
    pub fn new(
        execution_id: Uuid,
        stream_id: impl Into<String>,
        graph_name: impl Into<String>,
        trigger_payload: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            execution_id,
            stream_id: stream_id.into(),
            graph_name: graph_name.into(),
            status: ExecutionStatus::Pending,
            created_at: now,
            updated_at: now,
            pause_token: None,
            paused_node: None,
            trigger_payload,
            result: None,
            error: None,
        }
    }

    pub fn transition(&mut self, next: ExecutionStatus) -> Result<(), String> {
        if !self.status.can_transition_to(next) {
            return Err(format!("invalid transition {:?} -> {:?}", self.status, next));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_regressive_transitions() {
        let mut record = ExecutionRecord::new(Uuid::new_v4(), "s", "g", Value::Null);
        record.transition(ExecutionStatus::Running).unwrap();
        record.transition(ExecutionStatus::Completed).unwrap();
        assert!(record.transition(ExecutionStatus::Running).is_err());
    }

    #[test]
    fn pause_resume_round_trip() {
        let mut record = ExecutionRecord::new(Uuid::new_v4(), "s", "g", Value::Null);
        record.transition(ExecutionStatus::Running).unwrap();
        record.transition(ExecutionStatus::Paused).unwrap();
        record.transition(ExecutionStatus::Running).unwrap();
        record.transition(ExecutionStatus::Completed).unwrap();
        assert!(record.status.is_terminal());
    }
}
