use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Mutex, PoisonError};

use crate::domain::{Priority, QueueType, ShardId, Task, TaskId, TaskType};
use crate::ports::{DeadLetterReason, DeadLetterSink};

/// What is kept of a dead-lettered task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetterRecord {
    pub shard_id: ShardId,
    pub queue_type: QueueType,
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub attempt: u32,
    pub priority: Priority,
    pub reason: DeadLetterReason,
    pub recorded_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    fn from_task(task: &Task, reason: DeadLetterReason) -> Self {
        Self {
            shard_id: task.shard_id(),
            queue_type: task.queue_type(),
            task_id: task.task_id(),
            task_type: task.info().task_type,
            attempt: task.attempt(),
            priority: task.priority(),
            reason,
            recorded_at: Utc::now(),
        }
    }
}

/// Keeps dead letters in memory for inspection.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterQueue {
    records: Mutex<Vec<DeadLetterRecord>>,
}

impl InMemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count(&self, reason: DeadLetterReason) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.reason == reason)
            .count()
    }
}

impl DeadLetterSink for InMemoryDeadLetterQueue {
    fn dead_letter(&self, task: Task, reason: DeadLetterReason) {
        let record = DeadLetterRecord::from_task(&task, reason);
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryShard;
    use crate::testing::{info, test_task};

    #[test]
    fn records_task_and_reason() {
        let shard = InMemoryShard::new(ShardId(2));
        let mut task = test_task(&shard, QueueType::ActiveTimer, info(8, 0));
        task.increment_attempt();

        let dlq = InMemoryDeadLetterQueue::new();
        dlq.dead_letter(task, DeadLetterReason::AttemptsExhausted);

        let records = dlq.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].shard_id, ShardId(2));
        assert_eq!(records[0].task_id, TaskId(8));
        assert_eq!(records[0].attempt, 1);
        assert_eq!(dlq.count(DeadLetterReason::AttemptsExhausted), 1);
        assert_eq!(dlq.count(DeadLetterReason::Evicted), 0);
    }
}
