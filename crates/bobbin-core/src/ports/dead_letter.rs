use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::Task;

/// Why a task left the retry path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// `attempt` reached the configured ceiling.
    AttemptsExhausted,
    /// Pushed out of a full redispatch buffer.
    Evicted,
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadLetterReason::AttemptsExhausted => f.write_str("attempts_exhausted"),
            DeadLetterReason::Evicted => f.write_str("evicted"),
        }
    }
}

/// Receives tasks the redispatcher gives up on. Must not block.
pub trait DeadLetterSink: Send + Sync {
    fn dead_letter(&self, task: Task, reason: DeadLetterReason);
}
