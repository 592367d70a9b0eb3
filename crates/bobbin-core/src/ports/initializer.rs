use crate::domain::{Task, TaskInfo};

/// Builds runtime tasks from persisted records.
pub trait Initializer: Send + Sync {
    fn initialize(&self, info: TaskInfo) -> Task;
}
