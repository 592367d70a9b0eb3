//! Impls - 既定の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryShard**: 所有権 epoch と ack level を持つ shard
//! - **InMemoryDomainRegistry**: ドメイン設定の参照先
//! - **DomainPriorityAssigner** / **DomainOwnershipFilter**: ドメイン設定に基づく優先度と実行判定
//! - **InMemoryDeadLetterQueue**: 諦めたタスクの記録先
//! - **ShardTaskInitializer**: shard・executor・filter を束ねて Task を作る

pub mod dead_letter;
pub mod domain_registry;
pub mod filter;
pub mod initializer;
pub mod priority;
pub mod shard;

pub use self::dead_letter::{DeadLetterRecord, InMemoryDeadLetterQueue};
pub use self::domain_registry::InMemoryDomainRegistry;
pub use self::filter::DomainOwnershipFilter;
pub use self::initializer::ShardTaskInitializer;
pub use self::priority::DomainPriorityAssigner;
pub use self::shard::InMemoryShard;
