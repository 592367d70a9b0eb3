//! TaskType and QueueType - タスク種別とキュー種別

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of work a persisted task record describes.
///
/// The set is closed: every record produced by a workflow state transition maps
/// to exactly one variant. The variant alone does not say which queue a task
/// sits in (a `CancelExecution` exists both as a transfer and a cross-cluster
/// task), so it always travels together with a [`QueueType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    // transfer
    DecisionTask,
    ActivityTask,
    CloseExecution,
    CancelExecution,
    SignalExecution,
    StartChildExecution,
    RecordWorkflowStarted,
    ResetWorkflow,
    UpsertWorkflowSearchAttributes,

    // timer
    UserTimer,
    ActivityTimeout,
    DecisionTimeout,
    WorkflowTimeout,
    DeleteHistoryEvent,
    ActivityRetryTimer,
    WorkflowBackoffTimer,

    // replication
    HistoryReplication,
    SyncActivity,
    FailoverMarker,

    // cross-cluster only
    RecordChildWorkflowExecutionComplete,
    ApplyParentClosePolicy,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::DecisionTask => "decision_task",
            TaskType::ActivityTask => "activity_task",
            TaskType::CloseExecution => "close_execution",
            TaskType::CancelExecution => "cancel_execution",
            TaskType::SignalExecution => "signal_execution",
            TaskType::StartChildExecution => "start_child_execution",
            TaskType::RecordWorkflowStarted => "record_workflow_started",
            TaskType::ResetWorkflow => "reset_workflow",
            TaskType::UpsertWorkflowSearchAttributes => "upsert_workflow_search_attributes",
            TaskType::UserTimer => "user_timer",
            TaskType::ActivityTimeout => "activity_timeout",
            TaskType::DecisionTimeout => "decision_timeout",
            TaskType::WorkflowTimeout => "workflow_timeout",
            TaskType::DeleteHistoryEvent => "delete_history_event",
            TaskType::ActivityRetryTimer => "activity_retry_timer",
            TaskType::WorkflowBackoffTimer => "workflow_backoff_timer",
            TaskType::HistoryReplication => "history_replication",
            TaskType::SyncActivity => "sync_activity",
            TaskType::FailoverMarker => "failover_marker",
            TaskType::RecordChildWorkflowExecutionComplete => {
                "record_child_workflow_execution_complete"
            }
            TaskType::ApplyParentClosePolicy => "apply_parent_close_policy",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The queue a task was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueType {
    ActiveTransfer,
    StandbyTransfer,
    ActiveTimer,
    StandbyTimer,
    Replication,
    CrossCluster,
}

impl QueueType {
    /// Queues processing domains that are active in the local cluster.
    pub fn is_active(self) -> bool {
        matches!(self, QueueType::ActiveTransfer | QueueType::ActiveTimer)
    }

    /// Queues processing domains that are active in some other cluster.
    pub fn is_standby(self) -> bool {
        matches!(self, QueueType::StandbyTransfer | QueueType::StandbyTimer)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueType::ActiveTransfer => "active_transfer",
            QueueType::StandbyTransfer => "standby_transfer",
            QueueType::ActiveTimer => "active_timer",
            QueueType::StandbyTimer => "standby_timer",
            QueueType::Replication => "replication",
            QueueType::CrossCluster => "cross_cluster",
        }
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::active_transfer(QueueType::ActiveTransfer, true, false)]
    #[case::standby_transfer(QueueType::StandbyTransfer, false, true)]
    #[case::active_timer(QueueType::ActiveTimer, true, false)]
    #[case::standby_timer(QueueType::StandbyTimer, false, true)]
    #[case::replication(QueueType::Replication, false, false)]
    #[case::cross_cluster(QueueType::CrossCluster, false, false)]
    fn queue_type_classification(
        #[case] queue_type: QueueType,
        #[case] active: bool,
        #[case] standby: bool,
    ) {
        assert_eq!(queue_type.is_active(), active);
        assert_eq!(queue_type.is_standby(), standby);
    }

    #[test]
    fn task_type_serializes_as_snake_case() {
        let s = serde_json::to_string(&TaskType::StartChildExecution).unwrap();
        assert_eq!(s, "\"start_child_execution\"");
        assert_eq!(TaskType::StartChildExecution.to_string(), "start_child_execution");
    }
}
