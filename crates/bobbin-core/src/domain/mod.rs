//! Domain model (IDs, task records, ordering, priority, errors, ...).
//!
//! タスク処理コアが扱う値はすべてここに置きます。
//! 外部システムへの依存はなく、`ports` の trait だけを参照します。

pub mod cross_cluster;
pub mod errors;
pub mod ids;
pub mod key;
pub mod priority;
pub mod task;
pub mod task_type;

pub use cross_cluster::{
    ChildClosePolicy, CrossClusterTask, CrossClusterTaskAttributes, CrossClusterTaskRequest,
    CrossClusterTaskResponse, CrossClusterTaskResult, CrossClusterTaskState, FailureCause,
    ParentClosePolicy,
};
pub use errors::{ErrorKind, TaskError, UpdateError};
pub use ids::{Batch, BatchId, DomainId, Id, IdMarker, RunId, ShardId, TaskId, WorkflowId};
pub use key::TaskKey;
pub use priority::Priority;
pub use task::{Task, TaskInfo, TaskKind};
pub use task_type::{QueueType, TaskType};
