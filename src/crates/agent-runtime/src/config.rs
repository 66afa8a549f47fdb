//! Runtime configuration, following the builder pattern the teacher uses
//! throughout (`RetryPolicy::new().with_*()`, `InterruptConfig::new().with_*()`).

use runtime_graph::RetryPolicy;
use runtime_trace::RetentionPolicy;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Max executions running concurrently within one stream.
    pub max_concurrency: usize,
    /// Max executions queued (admitted, not yet running) within one stream.
    pub max_queue_depth: usize,
    pub retention: RetentionPolicy,
    pub retry: RetryPolicy,
    pub pause_ttl: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            max_queue_depth: 64,
            retention: RetentionPolicy::default(),
            retry: RetryPolicy::default(),
            pause_ttl: Duration::from_secs(3600),
        }
    }
}

impl StreamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    pub fn with_max_queue_depth(mut self, n: usize) -> Self {
        self.max_queue_depth = n;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_pause_ttl(mut self, ttl: Duration) -> Self {
        self.pause_ttl = ttl;
        self
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub storage_root: PathBuf,
    /// Capacity of each subscriber's event channel before the bus starts
    /// dropping the oldest unread event for that subscriber.
    pub event_bus_queue_depth: usize,
    pub default_stream: StreamConfig,
    pub shutdown_deadline: Duration,
    pub retention_sweep_interval: Duration,
    /// How often the background loop polls `PauseRegistry::sweep_expired`
    /// for pauses whose TTL elapsed with no `resume()` call.
    pub pause_sweep_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("./data/traces"),
            event_bus_queue_depth: 256,
            default_stream: StreamConfig::default(),
            shutdown_deadline: Duration::from_secs(30),
            retention_sweep_interval: Duration::from_secs(60),
            pause_sweep_interval: Duration::from_secs(15),
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = root.into();
        self
    }

    pub fn with_event_bus_queue_depth(mut self, depth: usize) -> Self {
        self.event_bus_queue_depth = depth;
        self
    }

    pub fn with_default_stream(mut self, stream: StreamConfig) -> Self {
        self.default_stream = stream;
        self
    }

    pub fn with_shutdown_deadline(mut self, deadline: Duration) -> Self {
        self.shutdown_deadline = deadline;
        self
    }
}
