//! Stats snapshots exposed by the daemons.

use serde::{Deserialize, Serialize};

use crate::app::DaemonStatus;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessorStats {
    pub status: DaemonStatus,
    /// Tasks admitted through `submit` / `try_submit`.
    pub submitted: u64,
    /// Executor invocations (including bookkeeping-only ones).
    pub executed: u64,
    pub succeeded: u64,
    /// Filter or executor failures.
    pub failed: u64,
    /// Dropped without execution or with the result ignored (stale epoch,
    /// stopped shard, terminal error, shutdown).
    pub discarded: u64,
    pub queued: usize,
    pub in_flight: usize,
    pub registered_shards: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedispatcherStats {
    pub status: DaemonStatus,
    pub buffered: usize,
    pub added: u64,
    pub redispatched: u64,
    pub dead_lettered: u64,
    pub evicted: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetcherStats {
    pub status: DaemonStatus,
    pub source_cluster: String,
    pub requests: u64,
    pub batches: u64,
    pub failed_batches: u64,
}
