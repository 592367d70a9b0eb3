//! Domain identifiers (strongly-typed IDs).
//!
//! 永続化されたタスクレコードの識別子はすべて newtype で包みます。
//! `DomainId` と `WorkflowId` のように同じ `String` 表現を持つ値でも、
//! 型が異なるので取り違えはコンパイル時に検出されます。
//!
//! ## ULID ベースの ID
//! プロセス内で生成する ID（fetch の集約ウィンドウなど）は ULID を使います。
//! `Id<T>` は Phantom type パターンで、`T` は実行時には使わないマーカー型です。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Identifier of a shard: a partition of the task keyspace owned by one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId(pub u32);

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard-{}", self.0)
    }
}

/// Identifier of a task, monotonic within a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub i64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }
    };
}

string_id!(
    /// Identifier of a domain (the tenant a workflow belongs to).
    DomainId
);
string_id!(
    /// Identifier of a workflow, unique within a domain.
    WorkflowId
);
string_id!(
    /// Identifier of one run of a workflow.
    RunId
);

/// IdMarker は各 ULID ID 型のマーカー trait
///
/// Display で使うプレフィックス（"batch-" など）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// `T` は PhantomData で、実行時にはメモリを消費しません。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// Generate a fresh, time-sortable id.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Fetch aggregation window のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Batch {}

impl IdMarker for Batch {
    fn prefix() -> &'static str {
        "batch-"
    }
}

/// Identifier of one fetch aggregation window (one outbound request).
pub type BatchId = Id<Batch>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_ids_are_distinct_types() {
        let domain = DomainId::new("orders");
        let workflow = WorkflowId::new("orders");

        assert_eq!(domain.as_str(), workflow.as_str());
        // let _: DomainId = workflow; // <- does not compile
    }

    #[test]
    fn batch_ids_are_sortable_and_prefixed() {
        let id1 = BatchId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = BatchId::generate();

        assert!(id1 < id2);
        assert!(id1.to_string().starts_with("batch-"));
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        assert_eq!(std::mem::size_of::<BatchId>(), std::mem::size_of::<Ulid>());
    }

    #[test]
    fn shard_id_display() {
        assert_eq!(ShardId(7).to_string(), "shard-7");
        assert_eq!(TaskId(42).to_string(), "42");
    }
}
