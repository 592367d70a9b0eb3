use std::sync::Arc;

use crate::domain::{CrossClusterTask, CrossClusterTaskRequest, QueueType, Task, TaskInfo};
use crate::ports::{Executor, Initializer, ShardContext, TaskFilter};

/// Binds a shard, a queue type and the executor/filter pair serving that
/// queue. Every task it builds captures the shard's current epoch.
#[derive(Clone)]
pub struct ShardTaskInitializer {
    shard: Arc<dyn ShardContext>,
    queue_type: QueueType,
    executor: Arc<dyn Executor>,
    filter: Arc<dyn TaskFilter>,
}

impl ShardTaskInitializer {
    pub fn new(
        shard: Arc<dyn ShardContext>,
        queue_type: QueueType,
        executor: Arc<dyn Executor>,
        filter: Arc<dyn TaskFilter>,
    ) -> Self {
        Self {
            shard,
            queue_type,
            executor,
            filter,
        }
    }

    /// Build a cross-cluster task from a request fetched from a remote
    /// cluster.
    pub fn initialize_cross_cluster(&self, request: CrossClusterTaskRequest) -> Task {
        let info = request.info.clone();
        self.initialize(info)
            .with_cross_cluster(CrossClusterTask::from_request(request))
    }
}

impl Initializer for ShardTaskInitializer {
    fn initialize(&self, info: TaskInfo) -> Task {
        Task::new(
            info,
            self.queue_type,
            Arc::clone(&self.shard),
            Arc::clone(&self.executor),
            Arc::clone(&self.filter),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ShardId, TaskId};
    use crate::impls::InMemoryShard;
    use crate::testing::{RecordingExecutor, always_process, cross_cluster_request, info};

    fn initializer(shard: &Arc<InMemoryShard>, queue_type: QueueType) -> ShardTaskInitializer {
        ShardTaskInitializer::new(
            shard.clone(),
            queue_type,
            RecordingExecutor::new(),
            always_process(),
        )
    }

    #[test]
    fn tasks_capture_current_epoch() {
        let shard = InMemoryShard::new(ShardId(4));
        let init = initializer(&shard, QueueType::ActiveTransfer);

        let first = init.initialize(info(1, 0));
        shard.renew_range();
        let second = init.initialize(info(2, 0));

        assert!(first.is_stale());
        assert!(!second.is_stale());
        assert_eq!(second.shard_id(), ShardId(4));
        assert_eq!(second.queue_type(), QueueType::ActiveTransfer);
    }

    #[test]
    fn cross_cluster_requests_carry_capability() {
        let shard = InMemoryShard::new(ShardId(4));
        let init = initializer(&shard, QueueType::CrossCluster);

        let task = init.initialize_cross_cluster(cross_cluster_request(7));
        assert_eq!(task.task_id(), TaskId(7));
        let cc = task.cross_cluster().unwrap();
        assert!(cc.is_ready_for_poll());
        assert_eq!(cc.target_cluster(), "remote");
    }
}
