//! Redispatcher - shard ごとのリトライバッファ
//!
//! Processor で失敗したタスクを預かり、backoff が明けたものから
//! `try_submit` で Processor に戻します。
//!
//! - `attempt >= max_attempts` のタスクはバッファに入れず dead letter に送ります。
//! - バッファは `buffer_capacity` で上限があり、溢れたら優先度が最も低いもの
//!   （同じ優先度なら最も古いもの）を dead letter に送ります。
//! - ループは interval の tick か `redispatch_now` で起き、`stop` で即座に終わります。

use std::cmp::Reverse;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::backoff::BackoffPolicy;
use super::daemon::{Daemon, DaemonStatus, StatusCell};
use super::processor::{Processor, RedispatchSink, SubmitOutcome};
use crate::config::RedispatcherConfig;
use crate::domain::{Priority, ShardId, Task, TaskKey};
use crate::observability::RedispatcherStats;
use crate::ports::{DeadLetterReason, DeadLetterSink};

struct Buffered {
    seq: u64,
    ready_at: Instant,
    task: Task,
}

impl Buffered {
    /// Redispatch order: best priority first, then key order.
    fn dispatch_key(&self) -> (Priority, TaskKey, u64) {
        (self.task.priority(), self.task.key(), self.seq)
    }
}

/// Bounded set of tasks waiting for redispatch.
struct RetryBuffer {
    capacity: usize,
    next_seq: u64,
    entries: Vec<Buffered>,
}

impl RetryBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_seq: 0,
            entries: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    /// Insert a task. If that overflows the buffer, the lowest-priority
    /// entry (oldest among equals) is removed and returned.
    fn push(&mut self, task: Task, ready_at: Instant) -> Option<Task> {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(Buffered {
            seq,
            ready_at,
            task,
        });
        if self.entries.len() <= self.capacity {
            return None;
        }
        self.evict_one()
    }

    fn evict_one(&mut self) -> Option<Task> {
        let victim = self
            .entries
            .iter()
            .enumerate()
            .max_by_key(|(_, e)| (e.task.priority(), Reverse(e.seq)))
            .map(|(i, _)| i)?;
        Some(self.entries.swap_remove(victim).task)
    }

    /// Remove the ready entries to offer this cycle, best first: at most as
    /// many as it takes to bring the buffer down to `target_size`.
    fn take_ready(&mut self, now: Instant, target_size: usize) -> Vec<Buffered> {
        let excess = self.entries.len().saturating_sub(target_size);
        if excess == 0 {
            return Vec::new();
        }
        let (mut ready, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.ready_at <= now);
        self.entries = pending;
        ready.sort_by_key(Buffered::dispatch_key);
        if ready.len() > excess {
            let rest = ready.split_off(excess);
            self.entries.extend(rest);
        }
        ready
    }

    /// Put back entries that were not taken. Tasks added in the meantime may
    /// push the buffer over capacity; the evicted tasks are returned.
    fn restore(&mut self, entries: Vec<Buffered>) -> Vec<Task> {
        self.entries.extend(entries);
        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            match self.evict_one() {
                Some(task) => evicted.push(task),
                None => break,
            }
        }
        evicted
    }

    fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }
}

#[derive(Debug, Default)]
struct Counters {
    added: AtomicU64,
    redispatched: AtomicU64,
    dead_lettered: AtomicU64,
    evicted: AtomicU64,
}

struct Inner {
    shard_id: ShardId,
    config: RedispatcherConfig,
    backoff: BackoffPolicy,
    processor: Processor,
    dead_letters: Arc<dyn DeadLetterSink>,
    buffer: Mutex<RetryBuffer>,
    wake: Notify,
    status: StatusCell,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    counters: Counters,
}

/// Retry buffer of one shard.
///
/// Creating it registers the shard with the processor, so failed tasks of the
/// shard start flowing here right away.
#[derive(Clone)]
pub struct Redispatcher {
    inner: Arc<Inner>,
}

impl Redispatcher {
    pub fn new(
        shard_id: ShardId,
        config: RedispatcherConfig,
        processor: Processor,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            shard_id,
            backoff: BackoffPolicy::from_config(&config),
            buffer: Mutex::new(RetryBuffer::new(config.buffer_capacity)),
            config,
            processor,
            dead_letters,
            wake: Notify::new(),
            status: StatusCell::new(),
            shutdown_tx,
            handle: Mutex::new(None),
            counters: Counters::default(),
        });
        let weak: Weak<Inner> = Arc::downgrade(&inner);
        inner.processor.register_shard(shard_id, weak);
        Self { inner }
    }

    pub fn shard_id(&self) -> ShardId {
        self.inner.shard_id
    }

    /// Buffer a task for a later retry. Never blocks.
    pub fn add_task(&self, task: Task) {
        self.inner.add(task);
    }

    /// Resubmit ready tasks until at most `target_size` remain buffered or
    /// the processor is saturated.
    pub fn redispatch(&self, target_size: usize) {
        self.inner.redispatch(target_size);
    }

    /// Wake the loop for an immediate cycle.
    pub fn redispatch_now(&self) {
        self.inner.wake.notify_one();
    }

    pub fn size(&self) -> usize {
        self.inner.buffer().len()
    }

    pub fn stats(&self) -> RedispatcherStats {
        let c = &self.inner.counters;
        RedispatcherStats {
            status: self.inner.status.get(),
            buffered: self.size(),
            added: c.added.load(Ordering::Relaxed),
            redispatched: c.redispatched.load(Ordering::Relaxed),
            dead_lettered: c.dead_lettered.load(Ordering::Relaxed),
            evicted: c.evicted.load(Ordering::Relaxed),
        }
    }
}

impl Inner {
    fn buffer(&self) -> MutexGuard<'_, RetryBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(&self, task: Task) {
        if self.status.is_stopped() {
            debug!(
                shard_id = %self.shard_id,
                task_id = %task.task_id(),
                "redispatcher stopped, dropping task"
            );
            return;
        }

        if task.attempt() >= self.config.max_attempts {
            error!(
                shard_id = %self.shard_id,
                task_id = %task.task_id(),
                attempt = task.attempt(),
                max_attempts = self.config.max_attempts,
                "task exhausted its attempts"
            );
            self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
            self.dead_letters
                .dead_letter(task, DeadLetterReason::AttemptsExhausted);
            return;
        }

        let delay = self.backoff.next_delay(task.attempt(), &mut rand::thread_rng());
        self.counters.added.fetch_add(1, Ordering::Relaxed);
        let evicted = self.buffer().push(task, Instant::now() + delay);
        if let Some(victim) = evicted {
            self.evict(victim);
        }
    }

    fn evict(&self, victim: Task) {
        warn!(
            shard_id = %self.shard_id,
            task_id = %victim.task_id(),
            priority = %victim.priority(),
            capacity = self.config.buffer_capacity,
            "redispatch buffer full, evicting task"
        );
        self.counters.evicted.fetch_add(1, Ordering::Relaxed);
        self.dead_letters.dead_letter(victim, DeadLetterReason::Evicted);
    }

    fn redispatch(&self, target_size: usize) {
        if let Err(err) = self.processor.ensure_accepting(self.shard_id) {
            debug!(shard_id = %self.shard_id, error = %err, "processor not accepting, skipping cycle");
            return;
        }

        // the buffer lock is not held while submitting
        let ready = self.buffer().take_ready(Instant::now(), target_size);
        if ready.is_empty() {
            return;
        }

        let mut taken = 0;
        let mut returned = Vec::new();
        let mut ready = ready.into_iter();
        for Buffered { seq, ready_at, task } in ready.by_ref() {
            match self.processor.try_submit(task) {
                Ok(SubmitOutcome::Accepted) => taken += 1,
                Ok(SubmitOutcome::Saturated(task)) => {
                    returned.push(Buffered {
                        seq,
                        ready_at,
                        task,
                    });
                    break;
                }
                Err(err) => {
                    // admission was checked above; only a concurrent stop lands here
                    warn!(shard_id = %self.shard_id, error = %err, "task dropped during redispatch");
                }
            }
        }
        returned.extend(ready);

        if !returned.is_empty() && !self.status.is_stopped() {
            let evicted = self.buffer().restore(returned);
            for victim in evicted {
                self.evict(victim);
            }
        }

        if taken > 0 {
            self.counters
                .redispatched
                .fetch_add(taken as u64, Ordering::Relaxed);
            debug!(shard_id = %self.shard_id, taken, remaining = self.buffer().len(), "redispatched tasks");
        }
    }
}

impl RedispatchSink for Inner {
    fn add_task(&self, task: Task) {
        self.add(task);
    }
}

async fn run_loop(inner: Arc<Inner>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(inner.config.redispatch_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {}
            _ = inner.wake.notified() => {}
        }
        if *shutdown_rx.borrow() {
            break;
        }
        inner.redispatch(inner.config.redispatch_target_size);
    }
    debug!(shard_id = %inner.shard_id, "redispatch loop exited");
}

#[async_trait]
impl Daemon for Redispatcher {
    fn start(&self) {
        if !self.inner.status.start() {
            return;
        }
        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        let handle = tokio::spawn(run_loop(Arc::clone(&self.inner), shutdown_rx));
        *self.inner.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!(shard_id = %self.inner.shard_id, "redispatcher started");
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
        let dropped = self.inner.buffer().clear();
        info!(shard_id = %self.inner.shard_id, dropped, "redispatcher stopped");
    }

    fn status(&self) -> DaemonStatus {
        self.inner.status.get()
    }
}
