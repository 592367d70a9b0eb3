//! Processor - 優先度付きワーカープール
//!
//! admission → ready heap → worker → executor の流れを管理します。
//!
//! - 容量は `worker_count + queue_size` 個の semaphore permit です。permit は
//!   タスクと一緒に heap に入り、実行が終わるか破棄されるまで保持されます。
//! - heap は (Priority, Key, shard, seq) 順で、ロックは push/pop の間だけ持ちます。
//!   await をまたいでロックを保持することはありません。
//! - 失敗したタスクは shard ごとに登録された [`RedispatchSink`] に渡します。
//!   Processor は sink を `Weak` で持つので、Redispatcher との所有権の循環はありません。
//! - `stop_shard_processor` が戻った後、その shard のタスクが executor に渡ることも
//!   ack されることもありません。実行中のものはキャンセルされます。

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::daemon::{Daemon, DaemonStatus, StatusCell};
use crate::config::ProcessorConfig;
use crate::domain::{ErrorKind, Priority, ShardId, Task, TaskError, TaskKey};
use crate::observability::ProcessorStats;
use crate::ports::PriorityAssigner;

const COMPONENT: &str = "processor";

/// Receives tasks that failed in the processor, for a later retry.
pub trait RedispatchSink: Send + Sync {
    fn add_task(&self, task: Task);
}

/// Result of a non-blocking submission.
#[derive(Debug)]
pub enum SubmitOutcome {
    Accepted,
    /// The pool is at capacity; the task is handed back untouched.
    Saturated(Task),
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted)
    }
}

/// Heap entry.
///
/// BinaryHeap is a max-heap, so the ordering is reversed: the entry with the
/// smallest (priority, key, shard, seq) is popped first.
struct ReadyTask {
    seq: u64,
    task: Task,
    permit: OwnedSemaphorePermit,
}

impl ReadyTask {
    fn sort_key(&self) -> (Priority, TaskKey, ShardId, u64) {
        (self.task.priority(), self.task.key(), self.task.shard_id(), self.seq)
    }
}

impl PartialEq for ReadyTask {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for ReadyTask {}

impl PartialOrd for ReadyTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.sort_key().cmp(&self.sort_key())
    }
}

/// Registration of one shard. `stopped` flips once, when the shard is
/// stopped; workers holding the slot observe it before executing and before
/// acking.
struct ShardSlot {
    sink: Weak<dyn RedispatchSink>,
    stopped: watch::Sender<bool>,
}

impl ShardSlot {
    fn new(sink: Weak<dyn RedispatchSink>) -> Self {
        let (stopped, _) = watch::channel(false);
        Self { sink, stopped }
    }

    fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }
}

/// Counts an execution as in flight for as long as it lives, including when
/// the worker running it is aborted.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    executed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
    in_flight: AtomicUsize,
}

struct Inner {
    config: ProcessorConfig,
    assigner: Arc<dyn PriorityAssigner>,
    permits: Arc<Semaphore>,
    ready: Mutex<BinaryHeap<ReadyTask>>,
    work_available: Notify,
    shards: Mutex<HashMap<ShardId, Arc<ShardSlot>>>,
    seq: AtomicU64,
    status: StatusCell,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Counters,
}

/// Bounded worker pool shared by all shards of a host.
///
/// Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct Processor {
    inner: Arc<Inner>,
}

impl Processor {
    pub fn new(config: ProcessorConfig, assigner: Arc<dyn PriorityAssigner>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let permits = Arc::new(Semaphore::new(config.capacity()));
        Self {
            inner: Arc::new(Inner {
                config,
                assigner,
                permits,
                ready: Mutex::new(BinaryHeap::new()),
                work_available: Notify::new(),
                shards: Mutex::new(HashMap::new()),
                seq: AtomicU64::new(0),
                status: StatusCell::new(),
                shutdown_tx,
                workers: Mutex::new(Vec::new()),
                counters: Counters::default(),
            }),
        }
    }

    /// Route failed tasks of `shard_id` to `sink`. Re-registering replaces
    /// the previous sink.
    pub fn register_shard(&self, shard_id: ShardId, sink: Weak<dyn RedispatchSink>) {
        self.inner
            .shards()
            .insert(shard_id, Arc::new(ShardSlot::new(sink)));
        debug!(%shard_id, "shard registered with processor");
    }

    /// Forget `shard_id`: queued tasks are dropped unexecuted, and an
    /// execution still in flight is cancelled without ack or redispatch.
    pub fn stop_shard_processor(&self, shard_id: ShardId) {
        if let Some(slot) = self.inner.shards().remove(&shard_id) {
            slot.stopped.send_replace(true);
        }
        let dropped = {
            let mut ready = self.inner.ready();
            let before = ready.len();
            ready.retain(|r| r.task.shard_id() != shard_id);
            before - ready.len()
        };
        self.inner
            .counters
            .discarded
            .fetch_add(dropped as u64, Ordering::Relaxed);
        info!(%shard_id, dropped, "shard processing stopped");
    }

    /// Admit a task, waiting for capacity.
    ///
    /// Fails with `Stopped` if the processor stops before capacity frees up,
    /// and with `ShardNotRegistered` for an unknown shard.
    pub async fn submit(&self, task: Task) -> Result<(), TaskError> {
        self.inner.check_admission(task.shard_id())?;
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| TaskError::Stopped(COMPONENT))?;
        self.inner.enqueue(task, permit);
        Ok(())
    }

    /// Admit a task if capacity is available right now. Never blocks.
    pub fn try_submit(&self, task: Task) -> Result<SubmitOutcome, TaskError> {
        self.inner.check_admission(task.shard_id())?;
        match Arc::clone(&self.inner.permits).try_acquire_owned() {
            Ok(permit) => {
                self.inner.enqueue(task, permit);
                Ok(SubmitOutcome::Accepted)
            }
            Err(TryAcquireError::NoPermits) => Ok(SubmitOutcome::Saturated(task)),
            Err(TryAcquireError::Closed) => Err(TaskError::Stopped(COMPONENT)),
        }
    }

    /// Whether tasks of `shard_id` would be admitted (capacity aside).
    pub fn ensure_accepting(&self, shard_id: ShardId) -> Result<(), TaskError> {
        self.inner.check_admission(shard_id)
    }

    pub fn stats(&self) -> ProcessorStats {
        let c = &self.inner.counters;
        ProcessorStats {
            status: self.inner.status.get(),
            submitted: c.submitted.load(Ordering::Relaxed),
            executed: c.executed.load(Ordering::Relaxed),
            succeeded: c.succeeded.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            discarded: c.discarded.load(Ordering::Relaxed),
            queued: self.inner.ready().len(),
            in_flight: c.in_flight.load(Ordering::Relaxed),
            registered_shards: self.inner.shards().len(),
        }
    }
}

impl Inner {
    fn ready(&self) -> MutexGuard<'_, BinaryHeap<ReadyTask>> {
        self.ready.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn shards(&self) -> MutexGuard<'_, HashMap<ShardId, Arc<ShardSlot>>> {
        self.shards.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot_for(&self, shard_id: ShardId) -> Option<Arc<ShardSlot>> {
        self.shards().get(&shard_id).cloned()
    }

    fn check_admission(&self, shard_id: ShardId) -> Result<(), TaskError> {
        if self.status.is_stopped() {
            return Err(TaskError::Stopped(COMPONENT));
        }
        if !self.shards().contains_key(&shard_id) {
            return Err(TaskError::ShardNotRegistered(shard_id));
        }
        Ok(())
    }

    fn enqueue(&self, mut task: Task, permit: OwnedSemaphorePermit) {
        if let Err(err) = self.assigner.assign(&mut task) {
            warn!(
                shard_id = %task.shard_id(),
                task_id = %task.task_id(),
                error = %err,
                "priority assignment failed, using lowest"
            );
            task.set_priority(Priority::Lowest);
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.ready().push(ReadyTask { seq, task, permit });
        self.work_available.notify_one();
    }

    fn pop_ready(&self) -> Option<ReadyTask> {
        self.ready().pop()
    }

    fn discard(&self, task: &Task, reason: &'static str) {
        self.counters.discarded.fetch_add(1, Ordering::Relaxed);
        debug!(
            shard_id = %task.shard_id(),
            task_id = %task.task_id(),
            reason,
            "task discarded"
        );
    }

    async fn process(&self, ready: ReadyTask) {
        let ReadyTask { task, permit, .. } = ready;
        let shard_id = task.shard_id();

        let Some(slot) = self.slot_for(shard_id) else {
            self.discard(&task, "shard stopped");
            return;
        };
        if task.is_stale() {
            self.discard(&task, "stale shard epoch");
            return;
        }

        let in_flight = InFlight::enter(&self.counters.in_flight);
        // None: the shard was stopped before the executor finished
        let result = match task.should_process() {
            Ok(should_process) => self
                .execute_unless_stopped(&task, should_process, &slot)
                .await
                .map(|r| r.map_err(|err| (err, true))),
            Err(err) => Some(Err((err, false))),
        };
        drop(in_flight);
        drop(permit);

        let Some(result) = result else {
            self.discard(&task, "shard stopped during execution");
            return;
        };
        match result {
            Ok(()) => {
                if self.ack_unless_stopped(&task, &slot) {
                    self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.discard(&task, "shard stopped during execution");
                }
            }
            Err(_) if slot.is_stopped() => self.discard(&task, "shard stopped during execution"),
            Err((err, executed)) => self.fail(task, err, executed, &slot.sink),
        }
    }

    /// Run the executor unless the shard is stopped first. The stop signal is
    /// polled ahead of the executor, so nothing runs once it has been raised.
    async fn execute_unless_stopped(
        &self,
        task: &Task,
        should_process: bool,
        slot: &ShardSlot,
    ) -> Option<Result<(), TaskError>> {
        let mut stopped = slot.stopped.subscribe();
        tokio::select! {
            biased;
            _ = stopped.wait_for(|stopped| *stopped) => None,
            result = async {
                self.counters.executed.fetch_add(1, Ordering::Relaxed);
                task.execute(should_process).await
            } => Some(result),
        }
    }

    /// Ack under the registration lock so it cannot interleave with
    /// `stop_shard_processor`.
    fn ack_unless_stopped(&self, task: &Task, slot: &ShardSlot) -> bool {
        let _shards = self.shards();
        if slot.is_stopped() {
            return false;
        }
        task.ack();
        true
    }

    fn fail(&self, mut task: Task, err: TaskError, executed: bool, sink: &Weak<dyn RedispatchSink>) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        if err.is_terminal() || err.kind() == ErrorKind::CrossClusterUpdate {
            warn!(
                shard_id = %task.shard_id(),
                task_id = %task.task_id(),
                error = %err,
                "task failed permanently"
            );
            self.discard(&task, "terminal error");
            return;
        }

        if executed {
            task.increment_attempt();
        }
        warn!(
            shard_id = %task.shard_id(),
            task_id = %task.task_id(),
            attempt = task.attempt(),
            error = %err,
            "task failed, handing to redispatcher"
        );
        match sink.upgrade() {
            Some(sink) => sink.add_task(task),
            None => self.discard(&task, "redispatcher dropped"),
        }
    }
}

async fn run_worker(inner: Arc<Inner>, worker_id: usize, mut shutdown_rx: watch::Receiver<bool>) {
    debug!(worker_id, "processor worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let Some(ready) = inner.pop_ready() else {
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = inner.work_available.notified() => {}
            }
            continue;
        };

        inner.process(ready).await;
    }
    debug!(worker_id, "processor worker stopped");
}

#[async_trait]
impl Daemon for Processor {
    fn start(&self) {
        if !self.inner.status.start() {
            return;
        }
        let worker_count = self.inner.config.worker_count;
        let mut workers = self.inner.workers.lock().unwrap_or_else(PoisonError::into_inner);
        for worker_id in 0..worker_count {
            let inner = Arc::clone(&self.inner);
            let shutdown_rx = self.inner.shutdown_tx.subscribe();
            workers.push(tokio::spawn(run_worker(inner, worker_id, shutdown_rx)));
        }
        info!(
            worker_count,
            capacity = self.inner.config.capacity(),
            "processor started"
        );
    }

    async fn stop(&self) {
        if !self.inner.status.stop() {
            return;
        }
        // closing the semaphore releases every blocked submit()
        self.inner.permits.close();
        self.inner.shutdown_tx.send_replace(true);

        let mut handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.inner.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let grace = self.inner.config.shutdown_grace();
        let joined = tokio::time::timeout(grace, async {
            while let Some(handle) = handles.last_mut() {
                let _ = handle.await;
                handles.pop();
            }
        })
        .await;
        if joined.is_err() {
            warn!(?grace, "in-flight executions did not finish in time, aborting workers");
            for handle in &handles {
                handle.abort();
            }
            // wait for the aborted executions to be dropped
            for handle in handles {
                let _ = handle.await;
            }
        }

        let dropped = {
            let mut ready = self.inner.ready();
            let n = ready.len();
            ready.clear();
            n
        };
        self.inner
            .counters
            .discarded
            .fetch_add(dropped as u64, Ordering::Relaxed);
        info!(dropped, "processor stopped");
    }

    fn status(&self) -> DaemonStatus {
        self.inner.status.get()
    }
}
