//! DomainOwnershipFilter - どのクラスタがタスクを実行すべきかの判定
//!
//! active queue はローカルクラスタで active なドメインだけを実行し、
//! standby queue は他クラスタで active なドメインだけを扱います。

use std::sync::Arc;

use crate::domain::{QueueType, TaskError, TaskInfo};
use crate::ports::{DomainRegistry, TaskFilter};

pub struct DomainOwnershipFilter {
    registry: Arc<dyn DomainRegistry>,
    local_cluster: String,
    queue_type: QueueType,
}

impl DomainOwnershipFilter {
    pub fn new(
        registry: Arc<dyn DomainRegistry>,
        local_cluster: impl Into<String>,
        queue_type: QueueType,
    ) -> Self {
        Self {
            registry,
            local_cluster: local_cluster.into(),
            queue_type,
        }
    }
}

impl TaskFilter for DomainOwnershipFilter {
    fn filter(&self, info: &TaskInfo) -> Result<bool, TaskError> {
        let entry = self.registry.get(&info.domain_id)?;
        let active_here = entry.is_active_in(&self.local_cluster);
        Ok(if self.queue_type.is_active() {
            active_here
        } else if self.queue_type.is_standby() {
            !active_here
        } else {
            true
        })
    }
}
