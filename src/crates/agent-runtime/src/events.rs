//! Outcome aggregator & event bus (C7): a lossy, multi-subscriber pub/sub
//! bus over execution lifecycle events.
//!
//! `Event`'s `tag`/`content` serde shape is grounded on
//! `orchestrator::api::ws::events::RealtimeEvent`. The bus itself is
//! grounded on `orchestrator::api::ws::pool::ConnectionPool`: a `DashMap`
//! keyed by subscriber id, each entry holding a bounded `mpsc::Sender` that
//! the bus is free to drop from when a slow subscriber falls behind —
//! lossy by design, since a trace (not the bus) is the durable record of
//! what happened. `EventFilter` is grounded on the same pool's per-connection
//! subscription list, narrowed here to stream id / execution id / event kind
//! instead of arbitrary topic strings.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    ExecutionAdmitted { execution_id: Uuid, stream_id: String },
    ExecutionStarted { execution_id: Uuid, stream_id: String },
    /// One per node attempt (§4.7's `node.decision`), published as the
    /// executor records each [`runtime_trace::Decision`] — `outcome` is
    /// `"success"`, `"suspend"`, or the failure kind tag (e.g.
    /// `"function_error"`).
    NodeDecision { execution_id: Uuid, stream_id: String, node: String, attempt: usize, outcome: String },
    ExecutionPaused { execution_id: Uuid, stream_id: String, node: String, pause_id: Uuid },
    ExecutionResumed { execution_id: Uuid, stream_id: String },
    ExecutionCompleted { execution_id: Uuid, stream_id: String, result: Value },
    ExecutionFailed { execution_id: Uuid, stream_id: String, error: String },
    ExecutionCancelled { execution_id: Uuid, stream_id: String },
}

impl Event {
    pub fn execution_id(&self) -> Uuid {
        match self {
            Event::ExecutionAdmitted { execution_id, .. }
            | Event::ExecutionStarted { execution_id, .. }
            | Event::NodeDecision { execution_id, .. }
            | Event::ExecutionPaused { execution_id, .. }
            | Event::ExecutionResumed { execution_id, .. }
            | Event::ExecutionCompleted { execution_id, .. }
            | Event::ExecutionFailed { execution_id, .. }
            | Event::ExecutionCancelled { execution_id, .. } => *execution_id,
        }
    }

    pub fn stream_id(&self) -> &str {
        match self {
            Event::ExecutionAdmitted { stream_id, .. }
            | Event::ExecutionStarted { stream_id, .. }
            | Event::NodeDecision { stream_id, .. }
            | Event::ExecutionPaused { stream_id, .. }
            | Event::ExecutionResumed { stream_id, .. }
            | Event::ExecutionCompleted { stream_id, .. }
            | Event::ExecutionFailed { stream_id, .. }
            | Event::ExecutionCancelled { stream_id, .. } => stream_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::ExecutionAdmitted { .. } => "execution_admitted",
            Event::ExecutionStarted { .. } => "execution_started",
            Event::NodeDecision { .. } => "node_decision",
            Event::ExecutionPaused { .. } => "execution_paused",
            Event::ExecutionResumed { .. } => "execution_resumed",
            Event::ExecutionCompleted { .. } => "execution_completed",
            Event::ExecutionFailed { .. } => "execution_failed",
            Event::ExecutionCancelled { .. } => "execution_cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: Event,
    pub emitted_at: DateTime<Utc>,
}

/// Narrows a subscription to the events a caller actually wants. Every
/// unset field matches everything; all set fields must match (an AND, not
/// an OR) for an event to reach that subscriber.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub stream_id: Option<String>,
    pub execution_id: Option<Uuid>,
    pub kinds: Option<HashSet<String>>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_stream(stream_id: impl Into<String>) -> Self {
        Self { stream_id: Some(stream_id.into()), ..Default::default() }
    }

    pub fn for_execution(execution_id: Uuid) -> Self {
        Self { execution_id: Some(execution_id), ..Default::default() }
    }

    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.kinds = Some(kinds.into_iter().map(Into::into).collect());
        self
    }

    fn matches(&self, event: &Event) -> bool {
        if let Some(stream_id) = &self.stream_id {
            if event.stream_id() != stream_id {
                return false;
            }
        }
        if let Some(execution_id) = &self.execution_id {
            if event.execution_id() != *execution_id {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(event.kind()) {
                return false;
            }
        }
        true
    }
}

struct Subscriber {
    sender: mpsc::Sender<Envelope>,
    dropped: Arc<AtomicU64>,
    filter: EventFilter,
}

/// Bounded per-subscriber channels; a full channel means that subscriber
/// drops the event rather than blocking the publisher.
pub struct EventBus {
    subscribers: DashMap<Uuid, Subscriber>,
    queue_depth: usize,
    published: AtomicU64,
}

impl EventBus {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            queue_depth,
            published: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self, filter: EventFilter) -> (Uuid, mpsc::Receiver<Envelope>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.queue_depth);
        self.subscribers.insert(
            id,
            Subscriber {
                sender: tx,
                dropped: Arc::new(AtomicU64::new(0)),
                filter,
            },
        );
        (id, rx)
    }

    pub fn unsubscribe(&self, id: Uuid) {
        self.subscribers.remove(&id);
    }

    pub fn publish(&self, event: Event) {
        self.published.fetch_add(1, Ordering::Relaxed);
        let envelope = Envelope { event, emitted_at: Utc::now() };
        for entry in self.subscribers.iter() {
            if !entry.filter.matches(&envelope.event) {
                continue;
            }
            if entry.sender.try_send(envelope.clone()).is_err() {
                entry.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn dropped_count(&self, id: Uuid) -> u64 {
        self.subscribers
            .get(&id)
            .map(|s| s.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

/// Wraps the shared [`runtime_trace::ExecutorHooks`] implementation
/// (`TraceCollector`) so one stream's `GraphExecutor` reports through both
/// the trace and the event bus from the same call site — the "natural hook
/// point" for `node.decision` (§4.7): every [`runtime_trace::Decision`] the
/// executor records is both appended to the trace and published as an
/// `Event::NodeDecision`, in that order, before `run_loop` uses the
/// decision for routing (§8 invariant 2).
pub struct EventPublishingHooks {
    inner: Arc<dyn runtime_trace::ExecutorHooks>,
    bus: Arc<EventBus>,
    stream_id: String,
}

impl EventPublishingHooks {
    pub fn new(
        inner: Arc<dyn runtime_trace::ExecutorHooks>,
        bus: Arc<EventBus>,
        stream_id: impl Into<String>,
    ) -> Self {
        Self { inner, bus, stream_id: stream_id.into() }
    }
}

#[async_trait::async_trait]
impl runtime_trace::ExecutorHooks for EventPublishingHooks {
    async fn on_start(&self, execution_id: Uuid, stream_id: String, graph_name: String) {
        self.inner.on_start(execution_id, stream_id, graph_name).await;
    }

    async fn on_decision(&self, execution_id: Uuid, decision: runtime_trace::Decision) {
        let outcome = match &decision.outcome {
            runtime_trace::DecisionOutcome::Success => "success".to_string(),
            runtime_trace::DecisionOutcome::Failure { kind, .. } => kind.clone(),
            runtime_trace::DecisionOutcome::Suspend { .. } => "suspend".to_string(),
        };
        let event = Event::NodeDecision {
            execution_id,
            stream_id: self.stream_id.clone(),
            node: decision.node.clone(),
            attempt: decision.attempt,
            outcome,
        };
        self.inner.on_decision(execution_id, decision).await;
        self.bus.publish(event);
    }

    async fn on_finish(&self, execution_id: Uuid, status: runtime_trace::TraceStatus) {
        self.inner.on_finish(execution_id, status).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_all_subscribers() {
        let bus = EventBus::new(8);
        let (_id_a, mut rx_a) = bus.subscribe(EventFilter::all());
        let (_id_b, mut rx_b) = bus.subscribe(EventFilter::all());
        bus.publish(Event::ExecutionStarted { execution_id: Uuid::new_v4(), stream_id: "s".into() });
        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test]
    async fn drops_for_a_full_subscriber_without_blocking_others() {
        let bus = EventBus::new(1);
        let (id_full, _rx_full_unread) = bus.subscribe(EventFilter::all());
        let (_id_other, mut rx_other) = bus.subscribe(EventFilter::all());
        for _ in 0..3 {
            bus.publish(Event::ExecutionResumed { execution_id: Uuid::new_v4(), stream_id: "s".into() });
        }
        assert!(bus.dropped_count(id_full) > 0);
        assert!(rx_other.recv().await.is_some());
    }

    #[tokio::test]
    async fn filters_by_stream_id() {
        let bus = EventBus::new(8);
        let (_id, mut rx) = bus.subscribe(EventFilter::for_stream("wanted"));
        bus.publish(Event::ExecutionStarted { execution_id: Uuid::new_v4(), stream_id: "other".into() });
        bus.publish(Event::ExecutionStarted { execution_id: Uuid::new_v4(), stream_id: "wanted".into() });
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event.stream_id(), "wanted");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn filters_by_execution_id() {
        let bus = EventBus::new(8);
        let target = Uuid::new_v4();
        let (_id, mut rx) = bus.subscribe(EventFilter::for_execution(target));
        bus.publish(Event::ExecutionStarted { execution_id: Uuid::new_v4(), stream_id: "s".into() });
        bus.publish(Event::ExecutionStarted { execution_id: target, stream_id: "s".into() });
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event.execution_id(), target);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn event_publishing_hooks_publishes_node_decision_and_forwards_to_inner() {
        use runtime_trace::{Decision, DecisionOutcome, ExecutorHooks, NullHooks};

        let bus = Arc::new(EventBus::new(8));
        let (_id, mut rx) = bus.subscribe(EventFilter::all().with_kinds(["node_decision"]));
        let hooks = EventPublishingHooks::new(Arc::new(NullHooks), bus, "s");

        let execution_id = Uuid::new_v4();
        let now = chrono::Utc::now();
        let decision = Decision::new(0, "a", now, now, 0, DecisionOutcome::Success, Some("b".into()));
        hooks.on_decision(execution_id, decision).await;

        let received = rx.recv().await.unwrap();
        match received.event {
            Event::NodeDecision { node, outcome, attempt, .. } => {
                assert_eq!(node, "a");
                assert_eq!(outcome, "success");
                assert_eq!(attempt, 0);
            }
            other => panic!("expected NodeDecision, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn filters_by_kind() {
        let bus = EventBus::new(8);
        let (_id, mut rx) = bus.subscribe(EventFilter::all().with_kinds(["execution_completed"]));
        bus.publish(Event::ExecutionStarted { execution_id: Uuid::new_v4(), stream_id: "s".into() });
        bus.publish(Event::ExecutionCompleted {
            execution_id: Uuid::new_v4(),
            stream_id: "s".into(),
            result: Value::Null,
        });
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event.kind(), "execution_completed");
        assert!(rx.try_recv().is_err());
    }
}
