//! App - アプリケーション層
//!
//! ports を組み合わせてタスク処理のパイプラインを組み立てます。
//!
//! # 主要コンポーネント
//! - **Processor**: 優先度付きワーカープール（admission, 実行, 失敗の引き渡し）
//! - **Redispatcher**: shard ごとのリトライバッファ（backoff, 上限, eviction）
//! - **Fetcher / Fetchers**: リモートクラスタへの集約 fetch
//! - **Daemon**: 上記に共通の start / stop / status

pub mod backoff;
pub mod daemon;
pub mod fetcher;
pub mod processor;
pub mod redispatcher;

pub use self::backoff::BackoffPolicy;
pub use self::daemon::{Daemon, DaemonStatus};
pub use self::fetcher::{FetchFuture, Fetcher, FetcherError, Fetchers};
pub use self::processor::{Processor, RedispatchSink, SubmitOutcome};
pub use self::redispatcher::Redispatcher;
