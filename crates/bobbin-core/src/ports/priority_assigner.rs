use crate::domain::{Task, TaskError};

/// Assigns a [`Priority`](crate::domain::Priority) to a task on admission.
///
/// Deterministic and never blocks on I/O. A failure is reported to the
/// caller, which falls back to `Priority::Lowest` and carries on.
pub trait PriorityAssigner: Send + Sync {
    fn assign(&self, task: &mut Task) -> Result<(), TaskError>;
}
