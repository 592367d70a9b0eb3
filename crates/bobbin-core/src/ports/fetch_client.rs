//! Fetch client port - リモートクラスタへの集約 RPC

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{CrossClusterTaskRequest, ShardId, TaskError};

/// Parameters of one shard's fetch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchParams {
    /// Upper bound on tasks returned for the shard.
    pub max_tasks: usize,
}

impl Default for FetchParams {
    fn default() -> Self {
        Self { max_tasks: 100 }
    }
}

impl FetchParams {
    /// Combine two requests for the same shard within one window.
    pub fn merge(self, other: FetchParams) -> FetchParams {
        FetchParams {
            max_tasks: self.max_tasks.max(other.max_tasks),
        }
    }
}

/// Result for a single shard within an aggregated response.
pub type ShardFetchResult = Result<Vec<CrossClusterTaskRequest>, TaskError>;

/// One aggregated RPC per fetch window.
///
/// The outer `Err` fails every shard of the batch; an inner `Err` fails only
/// that shard. A shard missing from the map is treated as failed.
#[async_trait]
pub trait FetchClient: Send + Sync {
    async fn fetch(
        &self,
        source_cluster: &str,
        requests: Vec<(ShardId, FetchParams)>,
    ) -> Result<HashMap<ShardId, ShardFetchResult>, TaskError>;
}
