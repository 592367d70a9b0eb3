//! Fetcher - リモートクラスタからの集約 fetch
//!
//! 複数 shard からの fetch 要求を短いウィンドウにまとめ、source cluster
//! ごとに 1 本の RPC として送ります。
//!
//! - ウィンドウは最初の要求で開き、`aggregation_interval` 経過か
//!   `max_batch_size` 個の shard が集まった時点で閉じます。
//! - RPC は常に 1 本だけです。RPC 中に届いた要求は次のウィンドウに入ります。
//! - 同じ shard の要求は 1 つにまとめ、全員に同じ結果を返します。
//! - バッチ全体の失敗はバッチ内の全員に返し、まとめて再試行はしません。

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::daemon::{Daemon, DaemonStatus, StatusCell};
use crate::config::FetcherConfig;
use crate::domain::{BatchId, ShardId, TaskError};
use crate::observability::FetcherStats;
use crate::ports::{FetchClient, FetchParams, ShardFetchResult};

const COMPONENT: &str = "fetcher";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FetcherError {
    #[error("duplicate fetcher for source cluster {0}")]
    DuplicateSourceCluster(String),
}

/// Resolves once the window that carried the request completes.
///
/// A dropped sender (fetcher stopped mid-flight) resolves to `Stopped`.
#[derive(Debug)]
pub struct FetchFuture {
    rx: oneshot::Receiver<ShardFetchResult>,
}

impl FetchFuture {
    fn ready(result: ShardFetchResult) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }
}

impl Future for FetchFuture {
    type Output = ShardFetchResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(TaskError::Stopped(COMPONENT))))
    }
}

struct FetchRequest {
    shard_id: ShardId,
    params: FetchParams,
    tx: oneshot::Sender<ShardFetchResult>,
}

struct PendingShard {
    params: FetchParams,
    waiters: Vec<oneshot::Sender<ShardFetchResult>>,
}

impl PendingShard {
    fn resolve(self, result: ShardFetchResult) {
        for tx in self.waiters {
            // the caller may have given up on the future
            let _ = tx.send(result.clone());
        }
    }
}

/// Requests collected for one RPC.
struct Window {
    batch_id: BatchId,
    shards: BTreeMap<ShardId, PendingShard>,
}

impl Window {
    fn open(first: FetchRequest) -> Self {
        let mut window = Self {
            batch_id: BatchId::generate(),
            shards: BTreeMap::new(),
        };
        window.add(first);
        window
    }

    fn add(&mut self, req: FetchRequest) {
        match self.shards.get_mut(&req.shard_id) {
            Some(pending) => {
                pending.params = pending.params.merge(req.params);
                pending.waiters.push(req.tx);
            }
            None => {
                self.shards.insert(
                    req.shard_id,
                    PendingShard {
                        params: req.params,
                        waiters: vec![req.tx],
                    },
                );
            }
        }
    }

    fn len(&self) -> usize {
        self.shards.len()
    }

    fn requests(&self) -> Vec<(ShardId, FetchParams)> {
        self.shards
            .iter()
            .map(|(shard_id, pending)| (*shard_id, pending.params))
            .collect()
    }

    fn fail_all(self, err: TaskError) {
        for pending in self.shards.into_values() {
            pending.resolve(Err(err.clone()));
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    batches: AtomicU64,
    failed_batches: AtomicU64,
}

struct Inner {
    source_cluster: String,
    config: FetcherConfig,
    client: Arc<dyn FetchClient>,
    request_tx: mpsc::Sender<FetchRequest>,
    request_rx: Mutex<Option<mpsc::Receiver<FetchRequest>>>,
    status: StatusCell,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    counters: Counters,
}

/// Aggregating fetcher for one source cluster.
#[derive(Clone)]
pub struct Fetcher {
    inner: Arc<Inner>,
}

impl Fetcher {
    pub fn new(
        source_cluster: impl Into<String>,
        config: FetcherConfig,
        client: Arc<dyn FetchClient>,
    ) -> Self {
        let (request_tx, request_rx) = mpsc::channel(config.request_buffer_size);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                source_cluster: source_cluster.into(),
                config,
                client,
                request_tx,
                request_rx: Mutex::new(Some(request_rx)),
                status: StatusCell::new(),
                shutdown_tx,
                handle: Mutex::new(None),
                counters: Counters::default(),
            }),
        }
    }

    pub fn source_cluster(&self) -> &str {
        &self.inner.source_cluster
    }

    /// Queue a fetch for `shard_id` into the current (or next) window.
    ///
    /// Fails immediately with `Stopped` when the fetcher is not running.
    pub fn fetch(&self, shard_id: ShardId, params: FetchParams) -> FetchFuture {
        if self.inner.status.get() != DaemonStatus::Started {
            return FetchFuture::ready(Err(TaskError::Stopped(COMPONENT)));
        }

        let (tx, rx) = oneshot::channel();
        let req = FetchRequest {
            shard_id,
            params,
            tx,
        };
        match self.inner.request_tx.try_send(req) {
            Ok(()) => {
                self.inner.counters.requests.fetch_add(1, Ordering::Relaxed);
                FetchFuture { rx }
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    source_cluster = %self.inner.source_cluster,
                    %shard_id,
                    "fetch request buffer full"
                );
                FetchFuture::ready(Err(TaskError::Fetch {
                    cluster: self.inner.source_cluster.clone(),
                    message: "request buffer full".into(),
                }))
            }
            Err(TrySendError::Closed(_)) => FetchFuture::ready(Err(TaskError::Stopped(COMPONENT))),
        }
    }

    pub fn stats(&self) -> FetcherStats {
        let c = &self.inner.counters;
        FetcherStats {
            status: self.inner.status.get(),
            source_cluster: self.inner.source_cluster.clone(),
            requests: c.requests.load(Ordering::Relaxed),
            batches: c.batches.load(Ordering::Relaxed),
            failed_batches: c.failed_batches.load(Ordering::Relaxed),
        }
    }
}

impl Inner {
    fn resolve(&self, window: Window, result: Result<HashMap<ShardId, ShardFetchResult>, TaskError>) {
        let batch_id = window.batch_id;
        match result {
            Ok(mut responses) => {
                debug!(
                    source_cluster = %self.source_cluster,
                    %batch_id,
                    shards = window.len(),
                    "fetch batch completed"
                );
                for (shard_id, pending) in window.shards {
                    let result = responses.remove(&shard_id).unwrap_or_else(|| {
                        Err(TaskError::Fetch {
                            cluster: self.source_cluster.clone(),
                            message: format!("no response for {shard_id}"),
                        })
                    });
                    pending.resolve(result);
                }
            }
            Err(err) => {
                self.counters.failed_batches.fetch_add(1, Ordering::Relaxed);
                warn!(
                    source_cluster = %self.source_cluster,
                    %batch_id,
                    shards = window.len(),
                    error = %err,
                    "fetch batch failed"
                );
                window.fail_all(err);
            }
        }
    }
}

async fn run_loop(
    inner: Arc<Inner>,
    mut request_rx: mpsc::Receiver<FetchRequest>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let max_batch_size = inner.config.max_batch_size;

    'windows: loop {
        let first = tokio::select! {
            _ = shutdown_rx.changed() => break 'windows,
            req = request_rx.recv() => match req {
                Some(req) => req,
                None => break 'windows,
            },
        };

        let mut window = Window::open(first);
        let deadline = tokio::time::sleep_until(Instant::now() + inner.config.aggregation_interval());
        tokio::pin!(deadline);

        while window.len() < max_batch_size {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    window.fail_all(TaskError::Stopped(COMPONENT));
                    break 'windows;
                }
                _ = &mut deadline => break,
                req = request_rx.recv() => match req {
                    Some(req) => window.add(req),
                    None => break,
                },
            }
        }

        inner.counters.batches.fetch_add(1, Ordering::Relaxed);
        debug!(
            source_cluster = %inner.source_cluster,
            batch_id = %window.batch_id,
            shards = window.len(),
            "sending fetch batch"
        );
        let requests = window.requests();
        tokio::select! {
            _ = shutdown_rx.changed() => {
                window.fail_all(TaskError::Stopped(COMPONENT));
                break 'windows;
            }
            result = inner.client.fetch(&inner.source_cluster, requests) => {
                inner.resolve(window, result);
            }
        }
    }

    request_rx.close();
    while let Ok(req) = request_rx.try_recv() {
        let _ = req.tx.send(Err(TaskError::Stopped(COMPONENT)));
    }
    debug!(source_cluster = %inner.source_cluster, "fetch loop exited");
}

#[async_trait]
impl Daemon for Fetcher {
    fn start(&self) {
        let Some(request_rx) = self
            .inner
            .request_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        if !self.inner.status.start() {
            return;
        }
        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        let handle = tokio::spawn(run_loop(Arc::clone(&self.inner), request_rx, shutdown_rx));
        *self.inner.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!(source_cluster = %self.inner.source_cluster, "fetcher started");
    }

    async fn stop(&self) {
        if !self.inner.status.stop() {
            return;
        }
        self.inner.shutdown_tx.send_replace(true);
        let handle = self
            .inner
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!(source_cluster = %self.inner.source_cluster, "fetcher stopped");
    }

    fn status(&self) -> DaemonStatus {
        self.inner.status.get()
    }
}

/// One [`Fetcher`] per source cluster.
pub struct Fetchers {
    fetchers: BTreeMap<String, Fetcher>,
    status: StatusCell,
}

impl Fetchers {
    pub fn new<I, S>(
        source_clusters: I,
        config: &FetcherConfig,
        client: Arc<dyn FetchClient>,
    ) -> Result<Self, FetcherError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut fetchers = BTreeMap::new();
        for cluster in source_clusters {
            let cluster = cluster.into();
            if fetchers.contains_key(&cluster) {
                return Err(FetcherError::DuplicateSourceCluster(cluster));
            }
            let fetcher = Fetcher::new(cluster.clone(), config.clone(), Arc::clone(&client));
            fetchers.insert(cluster, fetcher);
        }
        Ok(Self {
            fetchers,
            status: StatusCell::new(),
        })
    }

    pub fn get(&self, source_cluster: &str) -> Option<&Fetcher> {
        self.fetchers.get(source_cluster)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fetcher> {
        self.fetchers.values()
    }

    pub fn len(&self) -> usize {
        self.fetchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }

    pub fn stats(&self) -> Vec<FetcherStats> {
        self.iter().map(Fetcher::stats).collect()
    }
}

#[async_trait]
impl Daemon for Fetchers {
    fn start(&self) {
        if !self.status.start() {
            return;
        }
        for fetcher in self.fetchers.values() {
            fetcher.start();
        }
    }

    async fn stop(&self) {
        if !self.status.stop() {
            return;
        }
        for fetcher in self.fetchers.values() {
            fetcher.stop().await;
        }
    }

    fn status(&self) -> DaemonStatus {
        self.status.get()
    }
}
