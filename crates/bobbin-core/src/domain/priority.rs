//! Priority classes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scheduling class of a task. Variants are declared from most to least
/// urgent, so the derived `Ord` serves `High` first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Default,
    Low,
    /// Used when priority assignment failed.
    Lowest,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::High => "high",
            Priority::Default => "default",
            Priority::Low => "low",
            Priority::Lowest => "lowest",
        };
        f.write_str(s)
    }
}
