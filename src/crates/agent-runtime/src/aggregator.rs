//! Outcome aggregator (C7): rolls per-execution terminal outcomes up into
//! per-stream counters, grounded on the same `DashMap`-of-atomics idiom as
//! [`crate::events::EventBus`] (`orchestrator::api::ws::pool::ConnectionPool`).

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    paused: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StreamOutcomeSummary {
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub paused: u64,
}

#[derive(Default)]
pub struct OutcomeAggregator {
    per_stream: DashMap<String, Counters>,
}

impl OutcomeAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_completed(&self, stream_id: &str) {
        self.per_stream
            .entry(stream_id.to_string())
            .or_default()
            .completed
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self, stream_id: &str) {
        self.per_stream
            .entry(stream_id.to_string())
            .or_default()
            .failed
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self, stream_id: &str) {
        self.per_stream
            .entry(stream_id.to_string())
            .or_default()
            .cancelled
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_paused(&self, stream_id: &str) {
        self.per_stream
            .entry(stream_id.to_string())
            .or_default()
            .paused
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self, stream_id: &str) -> StreamOutcomeSummary {
        match self.per_stream.get(stream_id) {
            Some(c) => StreamOutcomeSummary {
                completed: c.completed.load(Ordering::Relaxed),
                failed: c.failed.load(Ordering::Relaxed),
                cancelled: c.cancelled.load(Ordering::Relaxed),
                paused: c.paused.load(Ordering::Relaxed),
            },
            None => StreamOutcomeSummary { completed: 0, failed: 0, cancelled: 0, paused: 0 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tallies_are_independent_per_stream() {
        let agg = OutcomeAggregator::new();
        agg.record_completed("a");
        agg.record_completed("a");
        agg.record_failed("b");
        assert_eq!(agg.summary("a").completed, 2);
        assert_eq!(agg.summary("b").failed, 1);
        assert_eq!(agg.summary("a").failed, 0);
    }
}
