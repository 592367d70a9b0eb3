//! Daemon - 起動・停止のライフサイクル
//!
//! Processor / Redispatcher / Fetcher はすべてこの trait を実装します。
//! `start` は一度だけ有効で、`stop` は冪等です。停止後の `start` は何もしません。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonStatus {
    Initialized,
    Started,
    Stopped,
}

impl fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DaemonStatus::Initialized => "initialized",
            DaemonStatus::Started => "started",
            DaemonStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[async_trait]
pub trait Daemon: Send + Sync {
    /// Spawn the background loops. Requires a running tokio runtime.
    fn start(&self);

    /// Stop the background loops and release blocked callers.
    async fn stop(&self);

    fn status(&self) -> DaemonStatus;
}

const INITIALIZED: u8 = 0;
const STARTED: u8 = 1;
const STOPPED: u8 = 2;

/// Lock-free lifecycle state shared by the daemons.
#[derive(Debug)]
pub(crate) struct StatusCell(AtomicU8);

impl StatusCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(INITIALIZED))
    }

    pub(crate) fn get(&self) -> DaemonStatus {
        match self.0.load(Ordering::Acquire) {
            INITIALIZED => DaemonStatus::Initialized,
            STARTED => DaemonStatus::Started,
            _ => DaemonStatus::Stopped,
        }
    }

    /// Initialized -> Started. Returns false if the transition did not happen.
    pub(crate) fn start(&self) -> bool {
        self.0
            .compare_exchange(INITIALIZED, STARTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Any -> Stopped. Returns false if already stopped.
    pub(crate) fn stop(&self) -> bool {
        self.0.swap(STOPPED, Ordering::AcqRel) != STOPPED
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.get() == DaemonStatus::Stopped
    }
}
