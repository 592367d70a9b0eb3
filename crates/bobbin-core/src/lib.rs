//! bobbin-core
//!
//! Task-processing core of a sharded workflow history service.
//!
//! 永続化されたタスクを、並行度の上限・優先度・リトライ・クラスタ間の協調つきで
//! 完了まで運びます。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task_type, task, key, priority, cross_cluster, errors）
//! - **ports**: 外部契約（ShardContext, Executor, TaskFilter, PriorityAssigner, FetchClient, ...）
//! - **app**: Processor, Redispatcher, Fetcher と Daemon ライフサイクル
//! - **impls**: 既定の実装（InMemoryShard, DomainPriorityAssigner, DomainOwnershipFilter, ...）
//! - **config**: TOML から読める設定
//! - **observability**: 統計のスナップショット

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{Daemon, DaemonStatus, Fetcher, Fetchers, Processor, Redispatcher, SubmitOutcome};
pub use config::{ConfigError, EngineConfig};
pub use domain::{Task, TaskError, TaskInfo};
