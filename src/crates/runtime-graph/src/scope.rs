//! Shared-state manager (C2): three isolation levels over a JSON value
//! store, with writes serialized per `(scope, key)` and locks always
//! acquired in `(ScopeLevel, key hash)` order to avoid deadlocks between
//! concurrently-running nodes.
//!
//! Grounded on the teacher's `DashMap`-backed concurrent-map idiom (seen in
//! `orchestrator::api::ws::pool::ConnectionPool`, which pairs a `DashMap`
//! with atomics for per-entry counters) generalized to three scope levels
//! instead of one flat connection table, with `parking_lot::Mutex` guarding
//! each individual key the way the pool guards each connection's counters.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;

/// The three isolation levels a key can live at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScopeLevel {
    /// Visible only within the node that wrote it; never shared.
    Private,
    /// Visible to every node within one execution stream.
    StreamShared,
    /// Visible across every stream served by the runtime.
    RuntimeShared,
}

#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("key '{0}' not found in scope")]
    NotFound(String),
    #[error("attempted to write private key '{key}' from a different execution ({owner} != {writer})")]
    PrivateViolation {
        key: String,
        owner: String,
        writer: String,
    },
}

/// Identifies one execution's view onto [`SharedStateManager`]: which
/// execution's private map to read/write, which stream's shared map, and
/// which runtime-wide map. `execution_id` is the §3 invariant that private
/// writes can never cross into another execution's view.
#[derive(Debug, Clone)]
pub struct ExecutionScope {
    pub execution_id: String,
    pub stream_id: String,
    pub runtime_id: String,
}

/// Owns all three maps for one runtime. One instance is shared by every
/// execution stream the runtime admits; `Private` keys are namespaced by
/// `execution_id` so two concurrent executions — even within the same
/// stream — never observe each other's working state (§8 invariant 5).
/// `StreamShared` keys are namespaced by `stream_id` for state a stream's
/// executions deliberately share with each other.
#[derive(Default)]
pub struct SharedStateManager {
    private: DashMap<(String, String), Value>, // (execution_id, key)
    stream_shared: DashMap<(String, String), Arc<Mutex<Value>>>, // (stream_id, key)
    runtime_shared: DashMap<String, Arc<Mutex<Value>>>, // key
}

/// Orders lock acquisition across levels and keys so two nodes racing to
/// touch the same pair of keys always take them in the same order.
fn key_hash(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

impl SharedStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_private(&self, execution_id: &str, key: &str) -> Option<Value> {
        self.private.get(&(execution_id.to_string(), key.to_string())).map(|v| v.clone())
    }

    pub fn set_private(&self, execution_id: &str, key: &str, value: Value) {
        self.private.insert((execution_id.to_string(), key.to_string()), value);
    }

    /// Every key currently set in one execution's private scope — used both
    /// to evaluate routing conditions against the full accumulated state
    /// (not just the most recent node's writes) and as the `snapshot(scope)`
    /// operation tracing reads from.
    pub fn snapshot_private(&self, execution_id: &str) -> HashMap<String, Value> {
        self.private
            .iter()
            .filter(|e| e.key().0 == execution_id)
            .map(|e| (e.key().1.clone(), e.value().clone()))
            .collect()
    }

    /// Drop every key namespaced to a finished execution. Called once an
    /// execution reaches a terminal status; the private scope's lifetime
    /// (§3: "created at admission ... destroyed after cleanup") ends here.
    pub fn clear_execution(&self, execution_id: &str) {
        self.private.retain(|(eid, _), _| eid != execution_id);
    }

    /// Atomic read-modify-write on one private key (§4.2's `update(scope,
    /// key, fn)`): `f` sees the key's current value (`Null` if unset) and
    /// returns its replacement, with no other writer able to observe an
    /// intermediate state — `DashMap::entry` holds the shard lock for the
    /// whole closure.
    pub fn update_private(
        &self,
        execution_id: &str,
        key: &str,
        f: impl FnOnce(Value) -> Value,
    ) -> Value {
        let mut entry = self
            .private
            .entry((execution_id.to_string(), key.to_string()))
            .or_insert(Value::Null);
        let current = std::mem::replace(entry.value_mut(), Value::Null);
        let updated = f(current);
        *entry.value_mut() = updated.clone();
        updated
    }

    pub fn get_stream_shared(&self, stream_id: &str, key: &str) -> Option<Value> {
        self.stream_shared
            .get(&(stream_id.to_string(), key.to_string()))
            .map(|v| v.lock().clone())
    }

    pub fn set_stream_shared(&self, stream_id: &str, key: &str, value: Value) {
        let entry = self
            .stream_shared
            .entry((stream_id.to_string(), key.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(Value::Null)));
        *entry.lock() = value;
    }

    /// Atomic read-modify-write on one stream-shared key, holding that
    /// key's own `Mutex` for the whole closure so concurrent nodes in the
    /// same stream never interleave a read and a write to it.
    pub fn update_stream_shared(
        &self,
        stream_id: &str,
        key: &str,
        f: impl FnOnce(Value) -> Value,
    ) -> Value {
        let entry = self
            .stream_shared
            .entry((stream_id.to_string(), key.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(Value::Null)))
            .clone();
        let mut guard = entry.lock();
        let current = std::mem::replace(&mut *guard, Value::Null);
        let updated = f(current);
        *guard = updated.clone();
        updated
    }

    pub fn get_runtime_shared(&self, key: &str) -> Option<Value> {
        self.runtime_shared.get(key).map(|v| v.lock().clone())
    }

    pub fn set_runtime_shared(&self, key: &str, value: Value) {
        let entry = self
            .runtime_shared
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Value::Null)));
        *entry.lock() = value;
    }

    /// Atomic read-modify-write on one runtime-shared key (the counter /
    /// rate-limit-state use case named in §4.2) — same single-key-lock
    /// shape as [`Self::update_stream_shared`], one scope level up.
    pub fn update_runtime_shared(&self, key: &str, f: impl FnOnce(Value) -> Value) -> Value {
        let entry = self
            .runtime_shared
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Value::Null)))
            .clone();
        let mut guard = entry.lock();
        let current = std::mem::replace(&mut *guard, Value::Null);
        let updated = f(current);
        *guard = updated.clone();
        updated
    }

    /// Apply an in-place update to two runtime-shared keys atomically,
    /// taking their locks in `(ScopeLevel::RuntimeShared, key_hash)` order
    /// regardless of the order the caller names them in.
    pub fn update_pair(
        &self,
        key_a: &str,
        key_b: &str,
        f: impl FnOnce(&mut Value, &mut Value),
    ) {
        let entry_a = self
            .runtime_shared
            .entry(key_a.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Value::Null)))
            .clone();
        let entry_b = self
            .runtime_shared
            .entry(key_b.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Value::Null)))
            .clone();

        let (first, second, swapped) = if key_hash(key_a) <= key_hash(key_b) {
            (entry_a, entry_b, false)
        } else {
            (entry_b, entry_a, true)
        };

        let mut guard_first = first.lock();
        let mut guard_second = second.lock();
        if swapped {
            f(&mut guard_second, &mut guard_first);
        } else {
            f(&mut guard_first, &mut guard_second);
        }
    }

    /// Drop every key namespaced to a finished stream (its `StreamShared`
    /// entries only — `Private` entries are cleared per-execution via
    /// [`Self::clear_execution`], not here).
    pub fn clear_stream(&self, stream_id: &str) {
        self.stream_shared.retain(|(sid, _), _| sid != stream_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_keys_are_isolated_by_execution() {
        let mgr = SharedStateManager::new();
        mgr.set_private("exec-a", "k", serde_json::json!(1));
        mgr.set_private("exec-b", "k", serde_json::json!(2));
        assert_eq!(mgr.get_private("exec-a", "k"), Some(serde_json::json!(1)));
        assert_eq!(mgr.get_private("exec-b", "k"), Some(serde_json::json!(2)));
    }

    #[test]
    fn clear_execution_only_drops_that_executions_private_keys() {
        let mgr = SharedStateManager::new();
        mgr.set_private("exec-a", "k", serde_json::json!(1));
        mgr.set_private("exec-b", "k", serde_json::json!(2));
        mgr.clear_execution("exec-a");
        assert_eq!(mgr.get_private("exec-a", "k"), None);
        assert_eq!(mgr.get_private("exec-b", "k"), Some(serde_json::json!(2)));
    }

    #[test]
    fn snapshot_private_collects_every_key_for_one_execution() {
        let mgr = SharedStateManager::new();
        mgr.set_private("exec-a", "x", serde_json::json!(1));
        mgr.set_private("exec-a", "y", serde_json::json!(2));
        mgr.set_private("exec-b", "x", serde_json::json!(99));
        let snap = mgr.snapshot_private("exec-a");
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.get("x"), Some(&serde_json::json!(1)));
        assert_eq!(snap.get("y"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn stream_shared_keys_are_isolated_by_stream() {
        let mgr = SharedStateManager::new();
        mgr.set_stream_shared("stream-1", "k", serde_json::json!("a"));
        mgr.set_stream_shared("stream-2", "k", serde_json::json!("b"));
        assert_eq!(mgr.get_stream_shared("stream-1", "k"), Some(serde_json::json!("a")));
        assert_eq!(mgr.get_stream_shared("stream-2", "k"), Some(serde_json::json!("b")));
        mgr.clear_stream("stream-1");
        assert_eq!(mgr.get_stream_shared("stream-1", "k"), None);
        assert_eq!(mgr.get_stream_shared("stream-2", "k"), Some(serde_json::json!("b")));
    }

    #[test]
    fn update_private_sees_current_value_and_replaces_it() {
        let mgr = SharedStateManager::new();
        mgr.set_private("exec-a", "counter", serde_json::json!(1));
        let updated = mgr.update_private("exec-a", "counter", |current| {
            serde_json::json!(current.as_i64().unwrap_or(0) + 1)
        });
        assert_eq!(updated, serde_json::json!(2));
        assert_eq!(mgr.get_private("exec-a", "counter"), Some(serde_json::json!(2)));
    }

    #[test]
    fn update_private_defaults_to_null_when_key_unset() {
        let mgr = SharedStateManager::new();
        let updated = mgr.update_private("exec-a", "fresh", |current| {
            assert!(current.is_null());
            serde_json::json!("first")
        });
        assert_eq!(updated, serde_json::json!("first"));
    }

    #[test]
    fn update_stream_shared_is_atomic_read_modify_write() {
        let mgr = SharedStateManager::new();
        mgr.set_stream_shared("stream-1", "count", serde_json::json!(5));
        let updated = mgr.update_stream_shared("stream-1", "count", |current| {
            serde_json::json!(current.as_i64().unwrap() + 1)
        });
        assert_eq!(updated, serde_json::json!(6));
        assert_eq!(mgr.get_stream_shared("stream-1", "count"), Some(serde_json::json!(6)));
    }

    #[test]
    fn update_runtime_shared_is_atomic_read_modify_write() {
        let mgr = SharedStateManager::new();
        mgr.set_runtime_shared("rate_limit_tokens", serde_json::json!(10));
        let updated = mgr.update_runtime_shared("rate_limit_tokens", |current| {
            serde_json::json!(current.as_i64().unwrap() - 1)
        });
        assert_eq!(updated, serde_json::json!(9));
        assert_eq!(mgr.get_runtime_shared("rate_limit_tokens"), Some(serde_json::json!(9)));
    }

    #[test]
    fn runtime_shared_pair_update_is_order_independent() {
        let mgr = SharedStateManager::new();
        mgr.set_runtime_shared("a", serde_json::json!(1));
        mgr.set_runtime_shared("b", serde_json::json!(2));
        mgr.update_pair("a", "b", |a, b| {
            let sum = a.as_i64().unwrap() + b.as_i64().unwrap();
            *a = serde_json::json!(sum);
            *b = serde_json::json!(sum);
        });
        assert_eq!(mgr.get_runtime_shared("a"), Some(serde_json::json!(3)));
        assert_eq!(mgr.get_runtime_shared("b"), Some(serde_json::json!(3)));
    }
}
