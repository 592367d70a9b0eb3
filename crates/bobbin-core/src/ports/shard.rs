//! Shard port - shard 所有権とキューの進捗管理

use crate::domain::{QueueType, ShardId, TaskKey};

/// The host-side view of an owned shard.
///
/// Tasks keep an `Arc<dyn ShardContext>` plus the `range_id` they were loaded
/// under. A task is stale once `is_owned()` turns false or `range_id()` moves
/// on; stale tasks are discarded, never executed.
pub trait ShardContext: Send + Sync {
    fn shard_id(&self) -> ShardId;

    /// Ownership epoch. Bumped every time the shard is (re)acquired.
    fn range_id(&self) -> i64;

    fn is_owned(&self) -> bool;

    /// Record that the task at `key` has completed on `queue_type`.
    fn update_ack_level(&self, queue_type: QueueType, key: TaskKey);
}
