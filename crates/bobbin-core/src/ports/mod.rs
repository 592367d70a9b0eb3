//! Ports - 抽象化レイヤー
//!
//! タスク処理コアが外部に要求する契約を定義します。
//! shard の所有権管理、タスクの実行、ドメイン設定の参照、リモートクラスタへの
//! RPC はすべてこの trait 越しに行い、実装は `impls` かホスト側が提供します。

pub mod dead_letter;
pub mod domain_registry;
pub mod executor;
pub mod fetch_client;
pub mod filter;
pub mod initializer;
pub mod priority_assigner;
pub mod shard;

pub use self::dead_letter::{DeadLetterReason, DeadLetterSink};
pub use self::domain_registry::{DomainEntry, DomainRegistry};
pub use self::executor::Executor;
pub use self::fetch_client::{FetchClient, FetchParams, ShardFetchResult};
pub use self::filter::TaskFilter;
pub use self::initializer::Initializer;
pub use self::priority_assigner::PriorityAssigner;
pub use self::shard::ShardContext;
