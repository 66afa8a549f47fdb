//! Trace storage: an async trait plus an in-memory and a JSON-file-backed
//! implementation. Structurally mirrors the teacher's `CheckpointSaver` /
//! `InMemoryCheckpointSaver` pair (`traits.rs`, `memory.rs`): a thin async
//! trait with `get`/`put` naming, backed here by a `DashMap` instead of a
//! `RwLock<HashMap>` since writes now come from many concurrent streams
//! rather than one thread at a time.

use crate::error::{Result, TraceError};
use crate::trace::Trace;
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Two-dimensional retention policy applied by a `TraceStore`: at most
/// `max_count` traces per `stream_id`, each discarded once older than `ttl`.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub max_count: usize,
    pub ttl: std::time::Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_count: 200,
            ttl: std::time::Duration::from_secs(7 * 24 * 3600),
        }
    }
}

#[async_trait]
pub trait TraceStore: Send + Sync {
    async fn put(&self, trace: &Trace) -> Result<()>;
    async fn get(&self, stream_id: &str, execution_id: Uuid) -> Result<Option<Trace>>;
    async fn list(&self, stream_id: &str) -> Result<Vec<Uuid>>;
    /// Apply the store's retention policy to `stream_id`, returning how many
    /// traces were pruned. Called periodically by the execution stream.
    async fn prune(&self, stream_id: &str, policy: RetentionPolicy) -> Result<usize>;
}

/// Reference implementation: ephemeral, process-local, for tests and for
/// runtimes that don't need traces to survive a restart.
#[derive(Default)]
pub struct InMemoryTraceStore {
    traces: DashMap<String, Vec<Trace>>,
}

impl InMemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TraceStore for InMemoryTraceStore {
    async fn put(&self, trace: &Trace) -> Result<()> {
        let mut entry = self.traces.entry(trace.stream_id.clone()).or_default();
        if let Some(existing) = entry.iter_mut().find(|t| t.execution_id == trace.execution_id) {
            *existing = trace.clone();
        } else {
            entry.push(trace.clone());
        }
        Ok(())
    }

    async fn get(&self, stream_id: &str, execution_id: Uuid) -> Result<Option<Trace>> {
        Ok(self
            .traces
            .get(stream_id)
            .and_then(|v| v.iter().find(|t| t.execution_id == execution_id).cloned()))
    }

    async fn list(&self, stream_id: &str) -> Result<Vec<Uuid>> {
        Ok(self
            .traces
            .get(stream_id)
            .map(|v| v.iter().map(|t| t.execution_id).collect())
            .unwrap_or_default())
    }

    async fn prune(&self, stream_id: &str, policy: RetentionPolicy) -> Result<usize> {
        let Some(mut entry) = self.traces.get_mut(stream_id) else {
            return Ok(0);
        };
        prune_vec(&mut entry, policy)
    }
}

/// Persists each trace as `{storage_root}/{stream_id}/traces/{execution_id}.json`.
pub struct FileTraceStore {
    storage_root: PathBuf,
    index: Arc<DashMap<String, Vec<Uuid>>>,
}

impl FileTraceStore {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            index: Arc::new(DashMap::new()),
        }
    }

    fn path_for(&self, stream_id: &str, execution_id: Uuid) -> PathBuf {
        self.storage_root
            .join(stream_id)
            .join("traces")
            .join(format!("{execution_id}.json"))
    }
}

#[async_trait]
impl TraceStore for FileTraceStore {
    async fn put(&self, trace: &Trace) -> Result<()> {
        let path = self.path_for(&trace.stream_id, trace.execution_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(trace)?;
        tokio::fs::write(&path, bytes).await?;
        self.index
            .entry(trace.stream_id.clone())
            .or_default()
            .push(trace.execution_id);
        Ok(())
    }

    async fn get(&self, stream_id: &str, execution_id: Uuid) -> Result<Option<Trace>> {
        let path = self.path_for(stream_id, execution_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TraceError::Io(e)),
        }
    }

    async fn list(&self, stream_id: &str) -> Result<Vec<Uuid>> {
        Ok(self.index.get(stream_id).map(|v| v.clone()).unwrap_or_default())
    }

    async fn prune(&self, stream_id: &str, policy: RetentionPolicy) -> Result<usize> {
        let Some(ids) = self.index.get(stream_id).map(|v| v.clone()) else {
            return Ok(0);
        };
        let mut loaded = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(trace) = self.get(stream_id, id).await? {
                loaded.push(trace);
            }
        }
        let removed = prune_vec(&mut loaded, policy)?;
        let remaining: Vec<Uuid> = loaded.iter().map(|t| t.execution_id).collect();
        for id in self.index.get(stream_id).map(|v| v.clone()).unwrap_or_default() {
            if !remaining.contains(&id) {
                let path = self.path_for(stream_id, id);
                let _ = tokio::fs::remove_file(path).await;
            }
        }
        if let Some(mut entry) = self.index.get_mut(stream_id) {
            *entry = remaining;
        }
        Ok(removed)
    }
}

/// Shared pruning logic: drop expired traces by TTL first, then trim to
/// `max_count` keeping the most recently started.
fn prune_vec(traces: &mut Vec<Trace>, policy: RetentionPolicy) -> Result<usize> {
    let before = traces.len();
    let cutoff = chrono::Utc::now() - chrono::Duration::from_std(policy.ttl).unwrap_or_default();
    traces.retain(|t| t.started_at >= cutoff);
    traces.sort_by_key(|t| t.started_at);
    if traces.len() > policy.max_count {
        let excess = traces.len() - policy.max_count;
        traces.drain(0..excess);
    }
    Ok(before - traces.len())
}
