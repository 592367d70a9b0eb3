//! Domain registry port - ドメイン設定の参照
//!
//! priority assigner と filter はここから「どのクラスタで active か」
//! 「throttle 中か」を引きます。

use std::collections::HashSet;

use crate::domain::{DomainId, TaskError, TaskType};

/// Per-domain settings consulted on admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainEntry {
    /// Cluster where the domain currently accepts writes.
    pub active_cluster: String,
    pub throttled: bool,
    /// Task types this domain wants served at low priority.
    pub low_priority_task_types: HashSet<TaskType>,
}

impl DomainEntry {
    pub fn active_in(cluster: impl Into<String>) -> Self {
        Self {
            active_cluster: cluster.into(),
            throttled: false,
            low_priority_task_types: HashSet::new(),
        }
    }

    pub fn throttled(mut self) -> Self {
        self.throttled = true;
        self
    }

    pub fn with_low_priority(mut self, task_type: TaskType) -> Self {
        self.low_priority_task_types.insert(task_type);
        self
    }

    pub fn is_active_in(&self, cluster: &str) -> bool {
        self.active_cluster == cluster
    }
}

pub trait DomainRegistry: Send + Sync {
    /// Look up a domain. Unknown domains yield `TaskError::DomainNotFound`.
    fn get(&self, domain_id: &DomainId) -> Result<DomainEntry, TaskError>;
}
