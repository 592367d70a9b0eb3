//! InMemoryShard - 開発用の shard
//!
//! 所有権の epoch（range id）と queue ごとの ack level を保持します。
//! `renew_range` / `release` で所有権の移動を再現できます。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::domain::{QueueType, ShardId, TaskId, TaskKey};
use crate::ports::ShardContext;

#[derive(Debug, Default)]
struct AckState {
    levels: HashMap<QueueType, TaskKey>,
    acked: Vec<(QueueType, TaskId)>,
}

#[derive(Debug)]
pub struct InMemoryShard {
    shard_id: ShardId,
    range_id: AtomicI64,
    owned: AtomicBool,
    acks: Mutex<AckState>,
}

impl InMemoryShard {
    pub fn new(shard_id: ShardId) -> Arc<Self> {
        Arc::new(Self {
            shard_id,
            range_id: AtomicI64::new(1),
            owned: AtomicBool::new(true),
            acks: Mutex::new(AckState::default()),
        })
    }

    /// Re-acquire the shard under a new epoch. Returns the new range id.
    pub fn renew_range(&self) -> i64 {
        self.owned.store(true, Ordering::SeqCst);
        self.range_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Give up ownership.
    pub fn release(&self) {
        self.owned.store(false, Ordering::SeqCst);
    }

    /// Highest key acked on `queue_type`.
    pub fn ack_level(&self, queue_type: QueueType) -> Option<TaskKey> {
        self.acks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .levels
            .get(&queue_type)
            .copied()
    }

    /// Every completion recorded so far, in order.
    pub fn acked(&self) -> Vec<(QueueType, TaskId)> {
        self.acks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .acked
            .clone()
    }
}

impl ShardContext for InMemoryShard {
    fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    fn range_id(&self) -> i64 {
        self.range_id.load(Ordering::SeqCst)
    }

    fn is_owned(&self) -> bool {
        self.owned.load(Ordering::SeqCst)
    }

    fn update_ack_level(&self, queue_type: QueueType, key: TaskKey) {
        let mut acks = self.acks.lock().unwrap_or_else(PoisonError::into_inner);
        acks.acked.push((queue_type, key.task_id));
        // completions arrive out of order; the level only moves forward
        let level = acks.levels.entry(queue_type).or_insert(key);
        if *level < key {
            *level = key;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn key(secs: i64, id: i64) -> TaskKey {
        TaskKey::new(Utc.timestamp_opt(secs, 0).unwrap(), TaskId(id))
    }

    #[test]
    fn ack_level_only_moves_forward() {
        let shard = InMemoryShard::new(ShardId(3));
        shard.update_ack_level(QueueType::ActiveTimer, key(10, 2));
        shard.update_ack_level(QueueType::ActiveTimer, key(5, 1));

        assert_eq!(shard.ack_level(QueueType::ActiveTimer), Some(key(10, 2)));
        assert_eq!(shard.ack_level(QueueType::ActiveTransfer), None);
        assert_eq!(shard.acked().len(), 2);
    }

    #[test]
    fn renew_range_reacquires_under_new_epoch() {
        let shard = InMemoryShard::new(ShardId(3));
        let before = shard.range_id();

        shard.release();
        assert!(!shard.is_owned());

        let after = shard.renew_range();
        assert_eq!(after, before + 1);
        assert!(shard.is_owned());
    }
}
