//! Test doubles shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::{Notify, Semaphore};

use crate::app::RedispatchSink;
use crate::domain::{
    CrossClusterTaskAttributes, CrossClusterTaskRequest, DomainId, QueueType, RunId, ShardId,
    Task, TaskError, TaskId, TaskInfo, TaskType, WorkflowId,
};
use crate::impls::InMemoryShard;
use crate::ports::{Executor, FetchClient, FetchParams, PriorityAssigner, ShardFetchResult, TaskFilter};

pub(crate) const TEST_DOMAIN: &str = "test-domain";

pub(crate) fn info(task_id: i64, secs: i64) -> TaskInfo {
    TaskInfo {
        domain_id: DomainId::new(TEST_DOMAIN),
        workflow_id: WorkflowId::new(format!("wf-{task_id}")),
        run_id: RunId::new("run"),
        task_id: TaskId(task_id),
        version: 1,
        task_type: TaskType::ActivityTask,
        visibility_timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
    }
}

pub(crate) fn always_process() -> Arc<dyn TaskFilter> {
    Arc::new(|_: &TaskInfo| Ok::<_, TaskError>(true))
}

pub(crate) fn test_task(shard: &Arc<InMemoryShard>, queue_type: QueueType, info: TaskInfo) -> Task {
    task_with(shard, queue_type, info, RecordingExecutor::new())
}

pub(crate) fn task_with(
    shard: &Arc<InMemoryShard>,
    queue_type: QueueType,
    info: TaskInfo,
    executor: Arc<dyn Executor>,
) -> Task {
    Task::new(info, queue_type, shard.clone(), executor, always_process())
}

pub(crate) fn cross_cluster_request(task_id: i64) -> CrossClusterTaskRequest {
    CrossClusterTaskRequest {
        info: TaskInfo {
            task_type: TaskType::SignalExecution,
            ..info(task_id, 0)
        },
        target_cluster: "remote".into(),
        attempt: 0,
        attributes: CrossClusterTaskAttributes::SignalExecution {
            target_domain_id: DomainId::new("target"),
            target_workflow_id: WorkflowId::new("target-wf"),
            target_run_id: None,
            signal_name: "ping".into(),
            initiated_event_id: 1,
        },
    }
}

/// Poll `cond` until it holds, failing the test after a few seconds.
pub(crate) async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..5_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not met in time");
}

/// Records every call and always succeeds.
#[derive(Default)]
pub(crate) struct RecordingExecutor {
    calls: Mutex<Vec<(TaskId, bool)>>,
}

impl RecordingExecutor {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn calls(&self) -> Vec<(TaskId, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn execute(&self, info: &TaskInfo, should_process_task: bool) -> Result<(), TaskError> {
        self.calls.lock().unwrap().push((info.task_id, should_process_task));
        Ok(())
    }
}

/// Fails the first `fail_first` executions of every task, then succeeds.
pub(crate) struct FlakyExecutor {
    fail_first: u32,
    seen: Mutex<HashMap<TaskId, u32>>,
    successes: AtomicUsize,
}

impl FlakyExecutor {
    pub(crate) fn new(fail_first: u32) -> Arc<Self> {
        Arc::new(Self {
            fail_first,
            seen: Mutex::new(HashMap::new()),
            successes: AtomicUsize::new(0),
        })
    }

    pub(crate) fn calls(&self, task_id: TaskId) -> u32 {
        self.seen.lock().unwrap().get(&task_id).copied().unwrap_or(0)
    }

    pub(crate) fn successes(&self) -> usize {
        self.successes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for FlakyExecutor {
    async fn execute(&self, info: &TaskInfo, _should_process_task: bool) -> Result<(), TaskError> {
        let n = {
            let mut seen = self.seen.lock().unwrap();
            let n = seen.entry(info.task_id).or_insert(0);
            *n += 1;
            *n
        };
        if n <= self.fail_first {
            return Err(TaskError::execution(format!("flaky failure #{n}")));
        }
        self.successes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Blocks every execution until the test releases it.
pub(crate) struct GatedExecutor {
    gate: Semaphore,
    started: AtomicUsize,
    started_notify: Notify,
    result: Result<(), TaskError>,
}

impl GatedExecutor {
    pub(crate) fn new() -> Arc<Self> {
        Self::with_result(Ok(()))
    }

    pub(crate) fn with_result(result: Result<(), TaskError>) -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            started: AtomicUsize::new(0),
            started_notify: Notify::new(),
            result,
        })
    }

    pub(crate) fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub(crate) async fn wait_started(&self, n: usize) {
        loop {
            let notified = self.started_notify.notified();
            if self.started.load(Ordering::SeqCst) >= n {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Executor for GatedExecutor {
    async fn execute(&self, _info: &TaskInfo, _should_process_task: bool) -> Result<(), TaskError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.started_notify.notify_waiters();
        self.gate.acquire().await.unwrap().forget();
        self.result.clone()
    }
}

/// Leaves the default priority and records the attempt of every admission.
#[derive(Default)]
pub(crate) struct RecordingAssigner {
    attempts: Mutex<Vec<(TaskId, u32)>>,
}

impl RecordingAssigner {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn attempts(&self) -> Vec<(TaskId, u32)> {
        self.attempts.lock().unwrap().clone()
    }
}

impl PriorityAssigner for RecordingAssigner {
    fn assign(&self, task: &mut Task) -> Result<(), TaskError> {
        self.attempts
            .lock()
            .unwrap()
            .push((task.task_id(), task.attempt()));
        Ok(())
    }
}

/// Collects the tasks a processor hands back for redispatch.
#[derive(Default)]
pub(crate) struct RecordingSink {
    tasks: Mutex<Vec<Task>>,
}

impl RecordingSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn weak(self: &Arc<Self>) -> Weak<dyn RedispatchSink> {
        let weak: Weak<RecordingSink> = Arc::downgrade(self);
        weak
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub(crate) fn take(&self) -> Vec<Task> {
        std::mem::take(&mut *self.tasks.lock().unwrap())
    }
}

impl RedispatchSink for RecordingSink {
    fn add_task(&self, task: Task) {
        self.tasks.lock().unwrap().push(task);
    }
}

/// Answers every shard with one cross-cluster request per call and records
/// each batch it sees.
#[derive(Default)]
pub(crate) struct FakeFetchClient {
    batches: Mutex<Vec<Vec<(ShardId, FetchParams)>>>,
    delay: Duration,
    fail_all: Option<TaskError>,
    failing_shards: HashSet<ShardId>,
}

impl FakeFetchClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn failing(mut self, err: TaskError) -> Self {
        self.fail_all = Some(err);
        self
    }

    pub(crate) fn failing_shard(mut self, shard_id: ShardId) -> Self {
        self.failing_shards.insert(shard_id);
        self
    }

    pub(crate) fn batches(&self) -> Vec<Vec<(ShardId, FetchParams)>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl FetchClient for FakeFetchClient {
    async fn fetch(
        &self,
        source_cluster: &str,
        requests: Vec<(ShardId, FetchParams)>,
    ) -> Result<HashMap<ShardId, ShardFetchResult>, TaskError> {
        self.batches.lock().unwrap().push(requests.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(err) = &self.fail_all {
            return Err(err.clone());
        }
        Ok(requests
            .into_iter()
            .map(|(shard_id, _)| {
                let result = if self.failing_shards.contains(&shard_id) {
                    Err(TaskError::Fetch {
                        cluster: source_cluster.to_string(),
                        message: format!("{shard_id} unavailable"),
                    })
                } else {
                    Ok(vec![cross_cluster_request(i64::from(shard_id.0))])
                };
                (shard_id, result)
            })
            .collect())
    }
}
