use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bobbin_core::app::{Daemon, Fetchers, Processor, Redispatcher};
use bobbin_core::config::EngineConfig;
use bobbin_core::domain::{
    CrossClusterTaskAttributes, CrossClusterTaskRequest, DomainId, QueueType, RunId, ShardId,
    TaskError, TaskId, TaskInfo, TaskType, WorkflowId,
};
use bobbin_core::impls::{
    DeadLetterRecord, DomainOwnershipFilter, DomainPriorityAssigner, InMemoryDeadLetterQueue,
    InMemoryDomainRegistry, InMemoryShard, ShardTaskInitializer,
};
use bobbin_core::observability::{FetcherStats, ProcessorStats, RedispatcherStats};
use bobbin_core::ports::{
    DomainEntry, Executor, FetchClient, FetchParams, Initializer, ShardFetchResult,
};

/// Run the task pipeline against in-memory shards and print the final stats.
#[derive(Debug, Parser)]
#[command(name = "bobbin", version)]
struct Args {
    /// TOML config file; defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of shards to simulate.
    #[arg(long, default_value_t = 2)]
    shards: u32,

    /// Tasks generated per shard.
    #[arg(long, default_value_t = 20)]
    tasks: u32,

    /// Executions of each task that fail before it succeeds.
    #[arg(long, default_value_t = 1)]
    fail_first: u32,

    #[arg(long, default_value = "cluster-a")]
    local_cluster: String,

    #[arg(long, default_value = "cluster-b")]
    remote_cluster: String,

    /// Give up waiting after this many seconds.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

/// Executor that fails the first `fail_first` runs of every task.
struct FlakyExecutor {
    fail_first: u32,
    runs: Mutex<HashMap<TaskId, u32>>,
}

impl FlakyExecutor {
    fn new(fail_first: u32) -> Self {
        Self {
            fail_first,
            runs: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Executor for FlakyExecutor {
    async fn execute(&self, info: &TaskInfo, should_process_task: bool) -> Result<(), TaskError> {
        let run = {
            let mut runs = self.runs.lock().map_err(|_| TaskError::execution("poisoned"))?;
            let n = runs.entry(info.task_id).or_insert(0);
            *n += 1;
            *n
        };
        if run <= self.fail_first {
            return Err(TaskError::execution(format!("intentional failure (run={run})")));
        }
        if should_process_task {
            info!(task_id = %info.task_id, task_type = %info.task_type, "processed");
        }
        Ok(())
    }
}

/// Stands in for the remote cluster: every shard has a couple of signals
/// waiting.
struct SimulatedRemote {
    per_shard: i64,
    served: AtomicU32,
}

#[async_trait]
impl FetchClient for SimulatedRemote {
    async fn fetch(
        &self,
        source_cluster: &str,
        requests: Vec<(ShardId, FetchParams)>,
    ) -> Result<HashMap<ShardId, ShardFetchResult>, TaskError> {
        sleep(Duration::from_millis(20)).await;
        self.served.fetch_add(1, Ordering::Relaxed);
        Ok(requests
            .into_iter()
            .map(|(shard_id, params)| {
                let count = self.per_shard.min(params.max_tasks as i64);
                let tasks = (0..count)
                    .map(|i| signal_request(source_cluster, shard_id, CROSS_CLUSTER_BASE + i))
                    .collect();
                (shard_id, Ok(tasks))
            })
            .collect())
    }
}

// task ids are unique across shards so the executor can key on them alone
const TASK_ID_STRIDE: i64 = 1_000_000;
const CROSS_CLUSTER_BASE: i64 = 900_000;

fn task_id(shard_id: ShardId, n: i64) -> TaskId {
    TaskId(i64::from(shard_id.0) * TASK_ID_STRIDE + n)
}

fn task_info(shard_id: ShardId, n: i64, domain: &str, task_type: TaskType) -> TaskInfo {
    TaskInfo {
        domain_id: DomainId::new(domain),
        workflow_id: WorkflowId::new(format!("wf-{}-{n}", shard_id.0)),
        run_id: RunId::new(format!("run-{n}")),
        task_id: task_id(shard_id, n),
        version: 1,
        task_type,
        visibility_timestamp: Utc::now() + ChronoDuration::milliseconds(n),
    }
}

fn signal_request(source_cluster: &str, shard_id: ShardId, n: i64) -> CrossClusterTaskRequest {
    CrossClusterTaskRequest {
        info: task_info(shard_id, n, "orders", TaskType::SignalExecution),
        target_cluster: source_cluster.to_string(),
        attempt: 0,
        attributes: CrossClusterTaskAttributes::SignalExecution {
            target_domain_id: DomainId::new("billing"),
            target_workflow_id: WorkflowId::new(format!("invoice-{n}")),
            target_run_id: None,
            signal_name: "order-placed".into(),
            initiated_event_id: n,
        },
    }
}

struct SimShard {
    shard: Arc<InMemoryShard>,
    redispatcher: Redispatcher,
    active: ShardTaskInitializer,
    standby: ShardTaskInitializer,
    cross_cluster: ShardTaskInitializer,
}

fn acked(shards: &[SimShard]) -> usize {
    shards.iter().map(|s| s.shard.acked().len()).sum()
}

#[derive(Debug, Serialize)]
struct Report {
    elapsed_ms: u128,
    expected: usize,
    acked: usize,
    processor: ProcessorStats,
    redispatchers: Vec<RedispatcherStats>,
    fetchers: Vec<FetcherStats>,
    dead_letters: Vec<DeadLetterRecord>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = EngineConfig::load(args.config.as_deref())?;

    // (A) domains: one active here, one active in the remote cluster, one throttled
    let registry = Arc::new(
        InMemoryDomainRegistry::new()
            .with_domain("orders", DomainEntry::active_in(&args.local_cluster))
            .with_domain("billing", DomainEntry::active_in(&args.remote_cluster))
            .with_domain(
                "reports",
                DomainEntry::active_in(&args.local_cluster).throttled(),
            ),
    );

    let processor = Processor::new(
        config.processor.clone(),
        Arc::new(DomainPriorityAssigner::new(registry.clone())),
    );
    processor.start();

    let dead_letters = Arc::new(InMemoryDeadLetterQueue::new());
    let executor: Arc<dyn Executor> = Arc::new(FlakyExecutor::new(args.fail_first));

    // (B) shards, each with its own redispatcher
    let mut shards = Vec::new();
    for id in 0..args.shards {
        let shard_id = ShardId(id);
        let shard = InMemoryShard::new(shard_id);
        let redispatcher = Redispatcher::new(
            shard_id,
            config.redispatcher.clone(),
            processor.clone(),
            dead_letters.clone(),
        );
        redispatcher.start();

        let initializer = |queue_type: QueueType| {
            ShardTaskInitializer::new(
                shard.clone(),
                queue_type,
                executor.clone(),
                Arc::new(DomainOwnershipFilter::new(
                    registry.clone(),
                    args.local_cluster.clone(),
                    queue_type,
                )),
            )
        };
        shards.push(SimShard {
            active: initializer(QueueType::ActiveTransfer),
            standby: initializer(QueueType::StandbyTransfer),
            cross_cluster: initializer(QueueType::CrossCluster),
            shard,
            redispatcher,
        });
    }

    // (C) local transfer tasks
    let mut expected = 0;
    for sim in &shards {
        let shard_id = sim.redispatcher.shard_id();
        for n in 0..i64::from(args.tasks) {
            let task = match n % 3 {
                0 => sim.active.initialize(task_info(shard_id, n, "orders", TaskType::ActivityTask)),
                1 => sim.standby.initialize(task_info(shard_id, n, "billing", TaskType::DecisionTask)),
                _ => sim.active.initialize(task_info(shard_id, n, "reports", TaskType::CloseExecution)),
            };
            processor.submit(task).await?;
            expected += 1;
        }
    }
    info!(expected, "local tasks submitted");

    // (D) cross-cluster tasks pulled from the remote cluster
    let remote = Arc::new(SimulatedRemote {
        per_shard: 2,
        served: AtomicU32::new(0),
    });
    let fetchers = Fetchers::new([args.remote_cluster.clone()], &config.fetcher, remote.clone())?;
    fetchers.start();
    if let Some(fetcher) = fetchers.get(&args.remote_cluster) {
        let futures: Vec<_> = shards
            .iter()
            .map(|sim| fetcher.fetch(sim.redispatcher.shard_id(), FetchParams::default()))
            .collect();
        for (sim, future) in shards.iter().zip(futures) {
            match future.await {
                Ok(requests) => {
                    for request in requests {
                        processor
                            .submit(sim.cross_cluster.initialize_cross_cluster(request))
                            .await?;
                        expected += 1;
                    }
                }
                Err(err) => warn!(error = %err, "cross-cluster fetch failed"),
            }
        }
    }
    info!(
        expected,
        batches = remote.served.load(Ordering::Relaxed),
        "cross-cluster tasks submitted"
    );

    // (E) wait until every task is acked or dead-lettered
    let started = Instant::now();
    let deadline = started + Duration::from_secs(args.timeout_secs);
    loop {
        if acked(&shards) + dead_letters.len() >= expected {
            break;
        }
        if Instant::now() >= deadline {
            warn!("timed out waiting for tasks");
            break;
        }
        for sim in &shards {
            sim.redispatcher.redispatch_now();
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted");
                break;
            }
            _ = sleep(Duration::from_millis(50)) => {}
        }
    }

    // (F) shut down in reverse order and report
    fetchers.stop().await;
    for sim in &shards {
        sim.redispatcher.stop().await;
    }
    processor.stop().await;

    let report = Report {
        elapsed_ms: started.elapsed().as_millis(),
        expected,
        acked: acked(&shards),
        processor: processor.stats(),
        redispatchers: shards.iter().map(|s| s.redispatcher.stats()).collect(),
        fetchers: fetchers.stats(),
        dead_letters: dead_letters.records(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
