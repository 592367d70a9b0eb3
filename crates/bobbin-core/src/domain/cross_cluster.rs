//! Cross-cluster task capability.
//!
//! A cross-cluster task needs a remote cluster to act on its copy of a
//! workflow (start a child, deliver a signal, ...). The source cluster exposes
//! the task as a [`CrossClusterTaskRequest`]; the target cluster answers with a
//! [`CrossClusterTaskResponse`], which is applied through
//! [`CrossClusterTask::update`].
//!
//! State transitions:
//! - ReadyForPoll -> Completed (success, or a terminal failure such as
//!   "workflow already running")
//! - ReadyForPoll -> Invalidated (the workflow or domain no longer exists, or
//!   the task was superseded)
//! - ReadyForPoll -> ReadyForPoll (retryable failure; the request attempt
//!   moves on so late duplicates of the old response are rejected)

use serde::{Deserialize, Serialize};

use super::errors::UpdateError;
use super::ids::{DomainId, RunId, TaskId, WorkflowId};
use super::task::TaskInfo;
use super::task_type::TaskType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossClusterTaskState {
    ReadyForPoll,
    Completed,
    Invalidated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentClosePolicy {
    Abandon,
    RequestCancel,
    Terminate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildClosePolicy {
    pub domain_id: DomainId,
    pub workflow_id: WorkflowId,
    pub run_id: Option<RunId>,
    pub policy: ParentClosePolicy,
}

/// What the target cluster is asked to do. One variant per cross-cluster
/// task type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CrossClusterTaskAttributes {
    StartChildExecution {
        target_domain_id: DomainId,
        target_workflow_id: WorkflowId,
        initiated_event_id: i64,
    },
    CancelExecution {
        target_domain_id: DomainId,
        target_workflow_id: WorkflowId,
        target_run_id: Option<RunId>,
        child_workflow_only: bool,
        initiated_event_id: i64,
    },
    SignalExecution {
        target_domain_id: DomainId,
        target_workflow_id: WorkflowId,
        target_run_id: Option<RunId>,
        signal_name: String,
        initiated_event_id: i64,
    },
    RecordChildWorkflowExecutionComplete {
        target_domain_id: DomainId,
        target_workflow_id: WorkflowId,
        target_run_id: RunId,
        close_event_id: i64,
    },
    ApplyParentClosePolicy {
        children: Vec<ChildClosePolicy>,
    },
}

impl CrossClusterTaskAttributes {
    pub fn task_type(&self) -> TaskType {
        match self {
            CrossClusterTaskAttributes::StartChildExecution { .. } => TaskType::StartChildExecution,
            CrossClusterTaskAttributes::CancelExecution { .. } => TaskType::CancelExecution,
            CrossClusterTaskAttributes::SignalExecution { .. } => TaskType::SignalExecution,
            CrossClusterTaskAttributes::RecordChildWorkflowExecutionComplete { .. } => {
                TaskType::RecordChildWorkflowExecutionComplete
            }
            CrossClusterTaskAttributes::ApplyParentClosePolicy { .. } => {
                TaskType::ApplyParentClosePolicy
            }
        }
    }
}

/// Request payload handed to the target cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossClusterTaskRequest {
    pub info: TaskInfo,
    pub target_cluster: String,
    pub attempt: u32,
    pub attributes: CrossClusterTaskAttributes,
}

/// Why the target cluster could not carry out a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    DomainNotActive,
    DomainNotExists,
    WorkflowAlreadyRunning,
    WorkflowNotExists,
    WorkflowAlreadyCompleted,
    Retryable,
}

impl FailureCause {
    /// The workflow state the task refers to is gone; the task can never
    /// succeed.
    fn invalidates(self) -> bool {
        matches!(self, FailureCause::WorkflowNotExists | FailureCause::DomainNotExists)
    }

    /// The target already reached the state the task asked for.
    fn is_terminal(self) -> bool {
        matches!(
            self,
            FailureCause::WorkflowAlreadyRunning | FailureCause::WorkflowAlreadyCompleted
        )
    }
}

/// Typed result of a cross-cluster request, one variant per task type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CrossClusterTaskResult {
    StartChildExecution { target_run_id: Option<RunId> },
    CancelExecution,
    SignalExecution,
    RecordChildWorkflowExecutionComplete,
    ApplyParentClosePolicy { failed_children: Vec<WorkflowId> },
}

impl CrossClusterTaskResult {
    pub fn task_type(&self) -> TaskType {
        match self {
            CrossClusterTaskResult::StartChildExecution { .. } => TaskType::StartChildExecution,
            CrossClusterTaskResult::CancelExecution => TaskType::CancelExecution,
            CrossClusterTaskResult::SignalExecution => TaskType::SignalExecution,
            CrossClusterTaskResult::RecordChildWorkflowExecutionComplete => {
                TaskType::RecordChildWorkflowExecutionComplete
            }
            CrossClusterTaskResult::ApplyParentClosePolicy { .. } => {
                TaskType::ApplyParentClosePolicy
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossClusterTaskResponse {
    pub task_id: TaskId,
    pub attempt: u32,
    pub result: CrossClusterTaskResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureCause>,
}

/// Cross-cluster state carried by a [`Task`](super::Task).
#[derive(Debug, Clone)]
pub struct CrossClusterTask {
    info: TaskInfo,
    target_cluster: String,
    attributes: CrossClusterTaskAttributes,
    state: CrossClusterTaskState,
    attempt: u32,
    outcome: Option<CrossClusterTaskResponse>,
}

impl CrossClusterTask {
    pub fn new(
        info: TaskInfo,
        target_cluster: impl Into<String>,
        attributes: CrossClusterTaskAttributes,
    ) -> Self {
        Self {
            info,
            target_cluster: target_cluster.into(),
            attributes,
            state: CrossClusterTaskState::ReadyForPoll,
            attempt: 0,
            outcome: None,
        }
    }

    /// Rebuild a task from a request fetched from the source cluster,
    /// keeping the attempt the source is waiting on.
    pub fn from_request(request: CrossClusterTaskRequest) -> Self {
        let mut task = Self::new(request.info, request.target_cluster, request.attributes);
        task.attempt = request.attempt;
        task
    }

    pub fn state(&self) -> CrossClusterTaskState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn target_cluster(&self) -> &str {
        &self.target_cluster
    }

    pub fn is_ready_for_poll(&self) -> bool {
        self.state == CrossClusterTaskState::ReadyForPoll
    }

    /// False once superseded or once the target workflow is known not to exist.
    pub fn is_valid(&self) -> bool {
        self.state != CrossClusterTaskState::Invalidated
    }

    /// Mark the task superseded (e.g. the source workflow moved on).
    pub fn invalidate(&mut self) {
        self.state = CrossClusterTaskState::Invalidated;
    }

    pub fn outcome(&self) -> Option<&CrossClusterTaskResponse> {
        self.outcome.as_ref()
    }

    pub fn request(&self) -> CrossClusterTaskRequest {
        CrossClusterTaskRequest {
            info: self.info.clone(),
            target_cluster: self.target_cluster.clone(),
            attempt: self.attempt,
            attributes: self.attributes.clone(),
        }
    }

    /// Apply a response from the target cluster.
    ///
    /// Rejected (and the task left untouched) if the task is no longer
    /// pending, the response belongs to another task or type, or it answers
    /// an older attempt.
    pub fn update(&mut self, response: CrossClusterTaskResponse) -> Result<(), UpdateError> {
        if self.state != CrossClusterTaskState::ReadyForPoll {
            return Err(UpdateError::NotPending(self.state));
        }
        if response.task_id != self.info.task_id {
            return Err(UpdateError::TaskIdMismatch {
                task: self.info.task_id,
                response: response.task_id,
            });
        }
        let task_type = self.attributes.task_type();
        let response_type = response.result.task_type();
        if task_type != response_type {
            return Err(UpdateError::TaskTypeMismatch {
                task: task_type,
                response: response_type,
            });
        }
        if response.attempt != self.attempt {
            return Err(UpdateError::StaleAttempt {
                current: self.attempt,
                response: response.attempt,
            });
        }

        match response.failure {
            None => self.state = CrossClusterTaskState::Completed,
            Some(cause) if cause.is_terminal() => self.state = CrossClusterTaskState::Completed,
            Some(cause) if cause.invalidates() => self.state = CrossClusterTaskState::Invalidated,
            Some(_) => {
                // retryable: poll again under a new attempt
                self.attempt += 1;
                return Ok(());
            }
        }
        self.outcome = Some(response);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::info;
    use rstest::rstest;

    fn start_child_task() -> CrossClusterTask {
        CrossClusterTask::new(
            info(11, 0),
            "cluster-b",
            CrossClusterTaskAttributes::StartChildExecution {
                target_domain_id: DomainId::new("child-domain"),
                target_workflow_id: WorkflowId::new("child"),
                initiated_event_id: 5,
            },
        )
    }

    fn start_child_response(attempt: u32, failure: Option<FailureCause>) -> CrossClusterTaskResponse {
        CrossClusterTaskResponse {
            task_id: TaskId(11),
            attempt,
            result: CrossClusterTaskResult::StartChildExecution {
                target_run_id: Some(RunId::new("run-1")),
            },
            failure,
        }
    }

    #[test]
    fn new_task_is_ready_and_valid() {
        let task = start_child_task();
        assert!(task.is_ready_for_poll());
        assert!(task.is_valid());
        assert_eq!(task.request().attributes.task_type(), TaskType::StartChildExecution);
        assert_eq!(task.request().target_cluster, "cluster-b");
    }

    #[test]
    fn successful_response_completes_task() {
        let mut task = start_child_task();
        task.update(start_child_response(0, None)).unwrap();

        assert_eq!(task.state(), CrossClusterTaskState::Completed);
        assert!(!task.is_ready_for_poll());
        assert!(task.outcome().is_some());
    }

    #[rstest]
    #[case::already_running(FailureCause::WorkflowAlreadyRunning, CrossClusterTaskState::Completed)]
    #[case::not_exists(FailureCause::WorkflowNotExists, CrossClusterTaskState::Invalidated)]
    #[case::domain_gone(FailureCause::DomainNotExists, CrossClusterTaskState::Invalidated)]
    #[case::not_active(FailureCause::DomainNotActive, CrossClusterTaskState::ReadyForPoll)]
    #[case::retryable(FailureCause::Retryable, CrossClusterTaskState::ReadyForPoll)]
    fn failure_causes_drive_state(
        #[case] cause: FailureCause,
        #[case] expected: CrossClusterTaskState,
    ) {
        let mut task = start_child_task();
        task.update(start_child_response(0, Some(cause))).unwrap();
        assert_eq!(task.state(), expected);
        assert_eq!(task.is_valid(), expected != CrossClusterTaskState::Invalidated);
    }

    #[test]
    fn retryable_failure_rejects_late_duplicate() {
        let mut task = start_child_task();
        task.update(start_child_response(0, Some(FailureCause::DomainNotActive)))
            .unwrap();
        assert_eq!(task.attempt(), 1);

        let err = task.update(start_child_response(0, None)).unwrap_err();
        assert_eq!(err, UpdateError::StaleAttempt { current: 1, response: 0 });

        task.update(start_child_response(1, None)).unwrap();
        assert_eq!(task.state(), CrossClusterTaskState::Completed);
    }

    #[test]
    fn mismatched_type_is_rejected() {
        let mut task = start_child_task();
        let response = CrossClusterTaskResponse {
            task_id: TaskId(11),
            attempt: 0,
            result: CrossClusterTaskResult::SignalExecution,
            failure: None,
        };

        let err = task.update(response).unwrap_err();
        assert!(matches!(err, UpdateError::TaskTypeMismatch { .. }));
        assert!(task.is_ready_for_poll());
    }

    #[test]
    fn mismatched_task_id_is_rejected() {
        let mut task = start_child_task();
        let mut response = start_child_response(0, None);
        response.task_id = TaskId(12);

        assert!(matches!(
            task.update(response),
            Err(UpdateError::TaskIdMismatch { .. })
        ));
    }

    #[test]
    fn completed_task_rejects_further_updates() {
        let mut task = start_child_task();
        task.update(start_child_response(0, None)).unwrap();

        let err = task.update(start_child_response(0, None)).unwrap_err();
        assert_eq!(err, UpdateError::NotPending(CrossClusterTaskState::Completed));
    }

    #[test]
    fn from_request_keeps_attempt() {
        let mut request = start_child_task().request();
        request.attempt = 4;

        let task = CrossClusterTask::from_request(request);
        assert_eq!(task.attempt(), 4);
        assert!(task.is_ready_for_poll());
    }

    #[test]
    fn invalidated_task_is_not_ready() {
        let mut task = start_child_task();
        task.invalidate();
        assert!(!task.is_valid());
        assert!(!task.is_ready_for_poll());
    }

    #[test]
    fn response_is_tagged_json() {
        let v = serde_json::to_value(start_child_response(0, None)).unwrap();
        assert_eq!(v["result"]["kind"], "start_child_execution");
        assert!(v.get("failure").is_none());
    }
}
