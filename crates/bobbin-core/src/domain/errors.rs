//! Errors - エラー型と分類
//!
//! `ErrorKind` は運用上の分類です。呼び出し側はこの分類で
//! 「redispatch するか」「捨てるか」「終了するか」を決めます。

use thiserror::Error;

use super::cross_cluster::CrossClusterTaskState;
use super::ids::{DomainId, ShardId, TaskId};
use super::task_type::TaskType;

/// Operational classification of a [`TaskError`].
///
/// - Admission: filter/priority could not decide; redispatch with the attempt unchanged.
/// - Execution: executor failed; redispatch with the attempt incremented.
/// - Lifecycle: the component is stopped or the shard is gone; terminal.
/// - CrossClusterUpdate: invalid state transition; the task is discarded.
/// - Fetch: an aggregated fetch failed for the caller's shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Admission,
    Execution,
    Lifecycle,
    CrossClusterUpdate,
    Fetch,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("{0} is stopped")]
    Stopped(&'static str),

    #[error("{0} is not registered with the processor")]
    ShardNotRegistered(ShardId),

    #[error("domain not found: {0}")]
    DomainNotFound(DomainId),

    #[error("filter failed: {0}")]
    Filter(String),

    #[error("priority assignment failed: {0}")]
    PriorityAssignment(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error(transparent)]
    CrossClusterUpdate(#[from] UpdateError),

    #[error("fetch from cluster {cluster} failed: {message}")]
    Fetch { cluster: String, message: String },
}

impl TaskError {
    pub fn execution(message: impl Into<String>) -> Self {
        TaskError::Execution(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::DomainNotFound(_)
            | TaskError::Filter(_)
            | TaskError::PriorityAssignment(_) => ErrorKind::Admission,
            TaskError::Execution(_) => ErrorKind::Execution,
            TaskError::Stopped(_) | TaskError::ShardNotRegistered(_) => ErrorKind::Lifecycle,
            TaskError::CrossClusterUpdate(_) => ErrorKind::CrossClusterUpdate,
            TaskError::Fetch { .. } => ErrorKind::Fetch,
        }
    }

    /// Lifecycle errors are never retried.
    pub fn is_terminal(&self) -> bool {
        self.kind() == ErrorKind::Lifecycle
    }
}

/// Reasons a cross-cluster response cannot be applied to a task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateError {
    #[error("stale attempt: task is at attempt {current}, response is for attempt {response}")]
    StaleAttempt { current: u32, response: u32 },

    #[error("task type mismatch: task is {task}, response is for {response}")]
    TaskTypeMismatch { task: TaskType, response: TaskType },

    #[error("task id mismatch: task is {task}, response is for {response}")]
    TaskIdMismatch { task: TaskId, response: TaskId },

    #[error("task is not pending (state: {0:?})")]
    NotPending(CrossClusterTaskState),

    #[error("task is not a cross-cluster task")]
    NotCrossCluster,
}
