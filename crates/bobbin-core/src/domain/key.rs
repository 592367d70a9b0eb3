//! Key: the total order among tasks of a shard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::ids::TaskId;

/// Identifies a task and defines a total order among tasks.
///
/// Tasks compare by visibility time first and by task id as the tie-break.
/// Task ids are unique within a shard queue, so two distinct tasks never
/// compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub visibility_timestamp: DateTime<Utc>,
    pub task_id: TaskId,
}

impl TaskKey {
    pub fn new(visibility_timestamp: DateTime<Utc>, task_id: TaskId) -> Self {
        Self {
            visibility_timestamp,
            task_id,
        }
    }

    pub fn less(&self, other: &TaskKey) -> bool {
        self < other
    }
}

impl PartialOrd for TaskKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TaskKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.visibility_timestamp
            .cmp(&other.visibility_timestamp)
            .then_with(|| self.task_id.cmp(&other.task_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn key(secs: i64, task_id: i64) -> TaskKey {
        TaskKey::new(Utc.timestamp_opt(secs, 0).unwrap(), TaskId(task_id))
    }

    #[test]
    fn visibility_time_orders_before_task_id() {
        assert!(key(1, 100).less(&key(2, 1)));
        assert!(!key(2, 1).less(&key(1, 100)));
    }

    #[test]
    fn task_id_breaks_ties() {
        assert!(key(5, 1).less(&key(5, 2)));
        assert!(!key(5, 2).less(&key(5, 1)));
        assert!(!key(5, 2).less(&key(5, 2)));
    }

    fn arb_keys() -> impl Strategy<Value = Vec<TaskKey>> {
        prop::collection::vec((0i64..1_000, 0i64..1_000), 0..64)
            .prop_map(|pairs| pairs.into_iter().map(|(s, id)| key(s, id)).collect())
    }

    proptest! {
        #[test]
        fn less_is_antisymmetric(a in (0i64..50, 0i64..50), b in (0i64..50, 0i64..50)) {
            let (a, b) = (key(a.0, a.1), key(b.0, b.1));
            prop_assert!(!(a.less(&b) && b.less(&a)));
            if a != b {
                prop_assert!(a.less(&b) || b.less(&a));
            }
        }

        #[test]
        fn sorting_is_idempotent(keys in arb_keys()) {
            let mut once = keys.clone();
            once.sort();
            let mut twice = once.clone();
            twice.sort();
            prop_assert_eq!(&once, &twice);
            for pair in once.windows(2) {
                prop_assert!(!pair[1].less(&pair[0]));
            }
        }
    }
}
