//! Filter port - 実行の要否判定

use crate::domain::{TaskError, TaskInfo};

/// Decides whether a task should be acted on.
///
/// - `Ok(true)`: execute normally.
/// - `Ok(false)`: skip; the executor still runs in bookkeeping-only mode.
/// - `Err`: no decision could be made; the task is redispatched with its
///   attempt unchanged.
pub trait TaskFilter: Send + Sync {
    fn filter(&self, info: &TaskInfo) -> Result<bool, TaskError>;
}

impl<F> TaskFilter for F
where
    F: Fn(&TaskInfo) -> Result<bool, TaskError> + Send + Sync,
{
    fn filter(&self, info: &TaskInfo) -> Result<bool, TaskError> {
        self(info)
    }
}
