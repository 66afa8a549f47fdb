//! Trace artifact types: the per-execution record a [`crate::collector::TraceCollector`]
//! builds up and a [`crate::store::TraceStore`] persists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single step of a graph execution: one node dispatch and its result.
/// The decision-relevant fields (`tokens`/`cost`/`intent`/`options`/`chosen`/
/// `reasoning`) are lifted straight from `runtime_graph::NodeMetrics` on a
/// successful dispatch and left at their defaults otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub step: u64,
    pub node: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub attempt: usize,
    pub outcome: DecisionOutcome,
    /// Edge chosen after this node ran, if any (`None` at the terminal node).
    pub next: Option<String>,
    #[serde(default)]
    pub tokens: Option<u64>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub chosen: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl Decision {
    /// Construct a `Decision` with no metrics, then let callers add metrics
    /// with the `with_*` builders — keeps every executor call site from
    /// repeating the same six-field boilerplate for the common
    /// (`function`/`router`/`pause`) case of "no decision metrics".
    pub fn new(
        step: u64,
        node: impl Into<String>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        attempt: usize,
        outcome: DecisionOutcome,
        next: Option<String>,
    ) -> Self {
        Self {
            step,
            node: node.into(),
            started_at,
            finished_at,
            attempt,
            outcome,
            next,
            tokens: None,
            cost: None,
            intent: None,
            options: Vec::new(),
            chosen: None,
            reasoning: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionOutcome {
    Success,
    /// `kind` is the structured failure taxonomy tag (e.g.
    /// `"function_error"`, `"no_edge_matched"`), `error` the human-readable
    /// detail. Kept as two fields rather than folding the tag into `error`
    /// so callers can match on failure category without parsing prose.
    Failure { kind: String, error: String },
    Suspend { reason: String },
}

/// Terminal status of an execution, recorded once the graph stops stepping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Completed,
    Failed,
    Cancelled,
    Paused,
}

/// The full trace of one graph execution, persisted as a single JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub execution_id: Uuid,
    pub stream_id: String,
    pub graph_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: Option<TraceStatus>,
    pub decisions: Vec<Decision>,
}

impl Trace {
    pub fn new(execution_id: Uuid, stream_id: impl Into<String>, graph_name: impl Into<String>) -> Self {
        Self {
            execution_id,
            stream_id: stream_id.into(),
            graph_name: graph_name.into(),
            started_at: Utc::now(),
            finished_at: None,
            status: None,
            decisions: Vec::new(),
        }
    }

    pub fn record(&mut self, decision: Decision) {
        self.decisions.push(decision);
    }

    pub fn finish(&mut self, status: TraceStatus) {
        self.finished_at = Some(Utc::now());
        self.status = Some(status);
    }

    /// Summary metrics used by `agent-runtime`'s outcome aggregator.
    pub fn summary(&self) -> TraceSummary {
        let retries = self
            .decisions
            .iter()
            .filter(|d| d.attempt > 0)
            .count();
        let failures = self
            .decisions
            .iter()
            .filter(|d| matches!(d.outcome, DecisionOutcome::Failure { .. }))
            .count();
        let total_tokens = self.decisions.iter().filter_map(|d| d.tokens).sum();
        let total_cost = self.decisions.iter().filter_map(|d| d.cost).sum();
        TraceSummary {
            step_count: self.decisions.len(),
            retry_count: retries,
            failure_count: failures,
            duration_ms: self.finished_at.map(|f| {
                (f - self.started_at).num_milliseconds().max(0) as u64
            }),
            total_tokens,
            total_cost,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TraceSummary {
    pub step_count: usize,
    pub retry_count: usize,
    pub failure_count: usize,
    pub duration_ms: Option<u64>,
    pub total_tokens: u64,
    pub total_cost: f64,
}
