//! DomainPriorityAssigner - ドメイン設定から優先度を決める
//!
//! 判定順:
//! 1. 未知のドメイン → エラー（呼び出し側が Lowest にフォールバック）
//! 2. standby queue / throttle 中 / 低優先度指定のタスク種別 → Low
//! 3. replication / cross-cluster queue → Default
//! 4. それ以外 → High

use std::sync::Arc;

use crate::domain::{Priority, QueueType, Task, TaskError, TaskType};
use crate::ports::{DomainEntry, DomainRegistry, PriorityAssigner};

pub struct DomainPriorityAssigner {
    registry: Arc<dyn DomainRegistry>,
}

impl DomainPriorityAssigner {
    pub fn new(registry: Arc<dyn DomainRegistry>) -> Self {
        Self { registry }
    }
}

impl PriorityAssigner for DomainPriorityAssigner {
    fn assign(&self, task: &mut Task) -> Result<(), TaskError> {
        let entry = self.registry.get(&task.info().domain_id)?;
        let priority = priority_for(task.queue_type(), task.info().task_type, &entry);
        task.set_priority(priority);
        Ok(())
    }
}

fn priority_for(queue_type: QueueType, task_type: TaskType, entry: &DomainEntry) -> Priority {
    if queue_type.is_standby()
        || entry.throttled
        || entry.low_priority_task_types.contains(&task_type)
    {
        return Priority::Low;
    }
    match queue_type {
        QueueType::Replication | QueueType::CrossCluster => Priority::Default,
        _ => Priority::High,
    }
}
