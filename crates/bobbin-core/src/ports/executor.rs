//! Executor port - タスクの副作用を実行する

use async_trait::async_trait;

use crate::domain::{TaskError, TaskInfo};

/// Carries out the side effects of a task.
///
/// With `should_process_task == false` only bookkeeping happens (the filter
/// decided the task is not ours to act on). Implementations must be
/// idempotent: a task can run again after a crash or a redispatch.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, info: &TaskInfo, should_process_task: bool) -> Result<(), TaskError>;
}
