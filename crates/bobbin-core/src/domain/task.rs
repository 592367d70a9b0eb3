use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::cross_cluster::{CrossClusterTask, CrossClusterTaskResponse};
use super::errors::{TaskError, UpdateError};
use super::ids::{DomainId, RunId, ShardId, TaskId, WorkflowId};
use super::key::TaskKey;
use super::priority::Priority;
use super::task_type::{QueueType, TaskType};
use crate::ports::{Executor, ShardContext, TaskFilter};

/// Metadata of a persisted task record.
///
/// This is the surface the executor and the filter see; the runtime fields
/// (attempt, priority, shard) live on [`Task`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub domain_id: DomainId,
    pub workflow_id: WorkflowId,
    pub run_id: RunId,
    pub task_id: TaskId,
    /// Failover version, used for multi-cluster conflict resolution.
    pub version: i64,
    pub task_type: TaskType,
    pub visibility_timestamp: DateTime<Utc>,
}

impl TaskInfo {
    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.visibility_timestamp, self.task_id)
    }
}

/// Variant data of a task. Callers that need cross-cluster behaviour ask for
/// the capability through [`Task::cross_cluster`] and handle its absence.
#[derive(Debug)]
pub enum TaskKind {
    Standard,
    CrossCluster(CrossClusterTask),
}

/// The unit of work handed between Processor and Redispatcher.
///
/// Ownership moves by value: at any time exactly one component holds a task,
/// so no two workers can mutate it concurrently.
pub struct Task {
    info: TaskInfo,
    queue_type: QueueType,
    attempt: u32,
    priority: Priority,

    /// The owning shard and the ownership epoch observed when the task was
    /// loaded. A task must not outlive shard ownership: once the epoch moves
    /// on, the task is stale.
    shard: Arc<dyn ShardContext>,
    range_id: i64,

    executor: Arc<dyn Executor>,
    filter: Arc<dyn TaskFilter>,
    kind: TaskKind,
}

impl Task {
    pub fn new(
        info: TaskInfo,
        queue_type: QueueType,
        shard: Arc<dyn ShardContext>,
        executor: Arc<dyn Executor>,
        filter: Arc<dyn TaskFilter>,
    ) -> Self {
        let range_id = shard.range_id();
        Self {
            info,
            queue_type,
            attempt: 0,
            priority: Priority::default(),
            shard,
            range_id,
            executor,
            filter,
            kind: TaskKind::Standard,
        }
    }

    pub fn with_cross_cluster(mut self, cross_cluster: CrossClusterTask) -> Self {
        self.kind = TaskKind::CrossCluster(cross_cluster);
        self
    }

    pub fn info(&self) -> &TaskInfo {
        &self.info
    }

    pub fn task_id(&self) -> TaskId {
        self.info.task_id
    }

    pub fn key(&self) -> TaskKey {
        self.info.key()
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    pub fn shard(&self) -> &Arc<dyn ShardContext> {
        &self.shard
    }

    pub fn shard_id(&self) -> ShardId {
        self.shard.shard_id()
    }

    /// Ownership epoch captured when the task was created.
    pub fn range_id(&self) -> i64 {
        self.range_id
    }

    /// The shard was lost or re-acquired under a new epoch since this task
    /// was loaded.
    pub fn is_stale(&self) -> bool {
        !self.shard.is_owned() || self.shard.range_id() != self.range_id
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub fn cross_cluster(&self) -> Option<&CrossClusterTask> {
        match &self.kind {
            TaskKind::CrossCluster(cc) => Some(cc),
            TaskKind::Standard => None,
        }
    }

    pub fn cross_cluster_mut(&mut self) -> Option<&mut CrossClusterTask> {
        match &mut self.kind {
            TaskKind::CrossCluster(cc) => Some(cc),
            TaskKind::Standard => None,
        }
    }

    /// Apply a response from the target cluster to the cross-cluster part of
    /// this task.
    pub fn update_cross_cluster(
        &mut self,
        response: CrossClusterTaskResponse,
    ) -> Result<(), UpdateError> {
        self.cross_cluster_mut()
            .ok_or(UpdateError::NotCrossCluster)?
            .update(response)
    }

    /// Run the admission filter. `Ok(false)` means the task is handled
    /// without side effects.
    pub fn should_process(&self) -> Result<bool, TaskError> {
        self.filter.filter(&self.info)
    }

    pub async fn execute(&self, should_process: bool) -> Result<(), TaskError> {
        self.executor.execute(&self.info, should_process).await
    }

    /// Record completion with the owning shard.
    pub fn ack(&self) {
        self.shard.update_ack_level(self.queue_type, self.key());
    }

    /// Count a failed execution. Called exactly once per hard failure,
    /// before the task is handed to the redispatcher.
    pub(crate) fn increment_attempt(&mut self) {
        self.attempt = self.attempt.saturating_add(1);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("shard_id", &self.shard_id())
            .field("range_id", &self.range_id)
            .field("queue_type", &self.queue_type)
            .field("task_id", &self.info.task_id)
            .field("task_type", &self.info.task_type)
            .field("attempt", &self.attempt)
            .field("priority", &self.priority)
            .field("kind", &self.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CrossClusterTaskResult, CrossClusterTaskState};
    use crate::impls::InMemoryShard;
    use crate::testing::{RecordingExecutor, always_process, cross_cluster_request, info, test_task};

    fn signal_response(task_id: i64) -> CrossClusterTaskResponse {
        CrossClusterTaskResponse {
            task_id: TaskId(task_id),
            attempt: 0,
            result: CrossClusterTaskResult::SignalExecution,
            failure: None,
        }
    }

    #[test]
    fn new_task_starts_at_attempt_zero_with_default_priority() {
        let shard = InMemoryShard::new(ShardId(1));
        let task = test_task(&shard, QueueType::ActiveTransfer, info(10, 0));

        assert_eq!(task.attempt(), 0);
        assert_eq!(task.priority(), Priority::Default);
        assert_eq!(task.range_id(), shard.range_id());
        assert!(task.cross_cluster().is_none());
    }

    #[test]
    fn task_goes_stale_when_shard_epoch_moves() {
        let shard = InMemoryShard::new(ShardId(1));
        let task = test_task(&shard, QueueType::ActiveTransfer, info(10, 0));
        assert!(!task.is_stale());

        shard.renew_range();
        assert!(task.is_stale());
    }

    #[test]
    fn task_goes_stale_when_shard_is_lost() {
        let shard = InMemoryShard::new(ShardId(1));
        let task = test_task(&shard, QueueType::ActiveTimer, info(10, 0));

        shard.release();
        assert!(task.is_stale());
    }

    #[test]
    fn increment_attempt_counts_up() {
        let shard = InMemoryShard::new(ShardId(1));
        let mut task = test_task(&shard, QueueType::ActiveTransfer, info(10, 0));
        task.increment_attempt();
        task.increment_attempt();
        assert_eq!(task.attempt(), 2);
    }

    #[tokio::test]
    async fn execute_passes_filter_decision_to_executor() {
        let shard = InMemoryShard::new(ShardId(1));
        let executor = RecordingExecutor::new();
        let task = Task::new(
            info(3, 0),
            QueueType::StandbyTransfer,
            shard.clone(),
            executor.clone(),
            Arc::new(|_: &TaskInfo| Ok::<_, TaskError>(false)),
        );

        let should_process = task.should_process().unwrap();
        task.execute(should_process).await.unwrap();

        assert_eq!(executor.calls(), vec![(TaskId(3), false)]);
    }

    #[test]
    fn ack_advances_shard_bookkeeping() {
        let shard = InMemoryShard::new(ShardId(1));
        let task = test_task(&shard, QueueType::ActiveTransfer, info(9, 0));
        task.ack();
        assert_eq!(shard.acked(), vec![(QueueType::ActiveTransfer, TaskId(9))]);
    }

    #[test]
    fn update_cross_cluster_completes_the_attached_task() {
        let shard = InMemoryShard::new(ShardId(1));
        let request = cross_cluster_request(4);
        let mut task = Task::new(
            request.info.clone(),
            QueueType::CrossCluster,
            shard.clone(),
            RecordingExecutor::new(),
            always_process(),
        )
        .with_cross_cluster(CrossClusterTask::from_request(request));

        task.update_cross_cluster(signal_response(4)).unwrap();
        let state = task.cross_cluster().map(CrossClusterTask::state);
        assert_eq!(state, Some(CrossClusterTaskState::Completed));
    }

    #[test]
    fn update_cross_cluster_rejects_standard_task() {
        let shard = InMemoryShard::new(ShardId(1));
        let mut task = test_task(&shard, QueueType::ActiveTransfer, info(4, 0));

        assert_eq!(
            task.update_cross_cluster(signal_response(4)),
            Err(UpdateError::NotCrossCluster)
        );
    }
}
