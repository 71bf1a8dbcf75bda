//! The master control plane.
//!
//! One `Master` owns every piece of scheduling state: the shard ownership
//! map, the per-epoch task arena, worker liveness, and method timing
//! stats. It runs as a single logical actor; all mutation happens on the
//! caller's task between awaits on the transport.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::MasterConfig;
use crate::error::MasterError;
use crate::kernel::KernelRegistry;
use crate::messages::{Envelope, MasterMessage, MessageTag, WorkerMessage};
use crate::stats::MethodStatsMap;
use crate::table::{TableDescriptor, TableRegistry};
use crate::task::{TableId, TaskArena, TaskStatus, WorkerId};
use crate::transport::Transport;
use crate::worker_state::WorkerState;

/// Seconds between progress dumps while a barrier is waiting.
const STATUS_DUMP_INTERVAL: f64 = 10.0;

/// One kernel run: which method to invoke and over which shards of which
/// table.
#[derive(Clone, Debug)]
pub struct RunDescriptor {
    pub kernel: String,
    pub method: String,
    pub table: TableId,
    pub shards: Vec<u32>,
}

impl RunDescriptor {
    pub fn new(kernel: &str, method: &str, table: TableId, shards: Vec<u32>) -> Self {
        Self {
            kernel: kernel.to_string(),
            method: method.to_string(),
            table,
            shards,
        }
    }

    /// Run over every shard of `table`.
    pub fn on_all_shards(kernel: &str, method: &str, table: &TableDescriptor) -> Self {
        Self::new(kernel, method, table.id, table.shards().collect())
    }
}

pub struct Master {
    pub(crate) config: MasterConfig,
    pub(crate) network: Box<dyn Transport>,
    pub(crate) kernels: Arc<KernelRegistry>,
    pub(crate) tables: TableRegistry,
    pub(crate) workers: Vec<WorkerState>,
    pub(crate) dead_workers: HashSet<WorkerId>,
    pub(crate) arena: TaskArena,
    pub(crate) method_stats: MethodStatsMap,
    pub(crate) shards_assigned: bool,
    pub(crate) kernel_epoch: u64,
    pub(crate) current_run: Option<RunDescriptor>,
    pub(crate) finished: usize,
    pub(crate) dispatched: usize,
    start: Instant,
}

impl Master {
    pub fn new(
        config: MasterConfig,
        network: Box<dyn Transport>,
        kernels: Arc<KernelRegistry>,
    ) -> Self {
        let start = Instant::now();
        let workers = (0..config.num_workers)
            .map(|slot| WorkerState::new(WorkerId(slot), 0.0))
            .collect();
        Self {
            config,
            network,
            kernels,
            tables: TableRegistry::default(),
            workers,
            dead_workers: HashSet::new(),
            arena: TaskArena::default(),
            method_stats: MethodStatsMap::default(),
            shards_assigned: false,
            kernel_epoch: 0,
            current_run: None,
            finished: 0,
            dispatched: 0,
            start,
        }
    }

    /// Seconds since master start on the steady clock.
    pub(crate) fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub(crate) fn alive(&self, id: WorkerId) -> bool {
        !self.dead_workers.contains(&id)
    }

    pub(crate) fn alive_workers(&self) -> Vec<WorkerId> {
        self.workers
            .iter()
            .map(|w| w.id)
            .filter(|&id| self.alive(id))
            .collect()
    }

    /// Register a new table; shards get owners before the first kernel run.
    pub fn create_table(&mut self, num_shards: u32) -> TableId {
        self.tables.create_table(num_shards)
    }

    pub fn table(&self, id: TableId) -> Option<&TableDescriptor> {
        self.tables.table(id)
    }

    pub fn table_ids(&self) -> Vec<TableId> {
        self.tables.tables().map(|t| t.id).collect()
    }

    pub fn is_alive(&self, id: WorkerId) -> bool {
        self.alive(id)
    }

    pub fn workers(&self) -> &[WorkerState] {
        &self.workers
    }

    pub fn finished(&self) -> usize {
        self.finished
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    pub fn kernel_epoch(&self) -> u64 {
        self.kernel_epoch
    }

    pub fn method_stats(&self) -> &MethodStatsMap {
        &self.method_stats
    }

    /// Formatted per-method stats, also dumped at shutdown.
    pub fn stats_report(&self) -> String {
        self.method_stats.report()
    }

    /// Block until every configured worker slot has said hello.
    pub async fn wait_for_workers(&mut self) -> Result<(), MasterError> {
        for seen in 0..self.config.num_workers {
            let env = self.network.read(MessageTag::Register).await?;
            let now = self.now();
            if let Some(worker) = self.workers.get_mut(env.from.0) {
                worker.ping(now);
            }
            info!(
                worker = env.from.0,
                remaining = self.config.num_workers - 1 - seen,
                "registered worker"
            );
        }
        info!("all workers registered; starting up");
        Ok(())
    }

    /// Run one kernel epoch to quiescence.
    ///
    /// Validates the descriptor, establishes shard ownership on the first
    /// epoch, creates this epoch's tasks, then drives dispatch, reaping,
    /// stealing and the flush/apply barrier until every shard has run and
    /// every worker reports zero outstanding updates.
    pub async fn run(&mut self, run: RunDescriptor) -> Result<(), MasterError> {
        if let Some(prev) = &self.current_run {
            if self.finished < prev.shards.len() {
                return Err(MasterError::RunInProgress {
                    remaining: prev.shards.len() - self.finished,
                });
            }
        }

        let kernel = self
            .kernels
            .kernel(&run.kernel)
            .ok_or_else(|| MasterError::UnknownKernel(run.kernel.clone()))?;
        if !kernel.has_method(&run.method) {
            return Err(MasterError::UnknownMethod {
                kernel: run.kernel.clone(),
                method: run.method.clone(),
            });
        }
        if self.tables.table(run.table).is_none() {
            return Err(MasterError::UnknownTable(run.table));
        }

        info!(
            kernel = %run.kernel,
            method = %run.method,
            table = run.table.0,
            shards = run.shards.len(),
            "running kernel"
        );

        self.finished = 0;
        self.dispatched = 0;
        self.method_stats.entry(&run.kernel, &run.method).calls += 1;
        let run_start = self.now();

        if !self.shards_assigned {
            self.assign_tables()?;
            self.send_assignments().await?;
            self.shards_assigned = true;
        }

        self.kernel_epoch += 1;
        self.assign_tasks(&run)?;
        self.dispatched = self.dispatch_work(&run);
        self.current_run = Some(run.clone());

        self.barrier(&run).await?;

        let elapsed = self.now() - run_start;
        self.method_stats.entry(&run.kernel, &run.method).total_time += elapsed;
        info!(method = %run.method, elapsed_s = elapsed, "kernel finished");
        Ok(())
    }

    /// Reap completions, steal, and re-dispatch until every task of the
    /// epoch is finished; then run the flush/apply rounds.
    async fn barrier(&mut self, run: &RunDescriptor) -> Result<(), MasterError> {
        let mut last_status_dump = self.now();

        while self.finished < run.shards.len() {
            if self.now() - last_status_dump > STATUS_DUMP_INTERVAL {
                last_status_dump = self.now();
                self.dump_progress(run);
            }

            let Some(_) = self.reap_one_task(run).await? else {
                continue;
            };
            self.finished += 1;

            // Stealing is only worth reconsidering after a reap, the one
            // event that can make a worker idle.
            let stats = self.method_stats.get(&run.kernel, &run.method);
            let avg_completion_time = stats.avg_completion_time();
            let mut need_update = false;
            if self.config.work_stealing && stats.shard_calls > 10 && avg_completion_time > 0.2 {
                let now = self.now();
                for slot in 0..self.workers.len() {
                    let idle = self.workers[slot].idle_time(&self.arena, now);
                    if idle > 0.5 {
                        let dst = self.workers[slot].id;
                        if self.steal_work(run, dst, avg_completion_time) {
                            need_update = true;
                        }
                    }
                }
            }
            if need_update {
                // Workers must see the new ownership map before any
                // dispatch of the migrated tasks.
                self.send_assignments().await?;
            }

            if self.dispatched < run.shards.len() {
                self.dispatched += self.dispatch_work(run);
            }
        }

        self.flush_and_apply().await
    }

    /// Try to consume one `KERNEL_DONE`; sleeps the poll backoff when the
    /// mailbox has nothing for us.
    async fn reap_one_task(&mut self, run: &RunDescriptor) -> Result<Option<WorkerId>, MasterError> {
        let Some(Envelope { from, msg }) = self.network.try_read(MessageTag::KernelDone) else {
            sleep(self.config.sleep_time).await;
            return Ok(None);
        };
        let MasterMessage::KernelDone(done) = msg else {
            return Ok(None);
        };
        if !self.alive(from) {
            warn!(worker = from.0, "ignoring completion from dead worker");
            return Ok(None);
        }

        for info in &done.shards {
            self.tables.update_partitions(info);
        }

        let task_id = done.request.task_id();
        let now = self.now();
        let worker = &mut self.workers[from.0];
        match worker.work.get(&task_id) {
            Some(&index) => {
                let task = self.arena.get_mut(index);
                if task.status != TaskStatus::Active {
                    warn!(
                        worker = from.0,
                        shard = task_id.shard,
                        status = ?task.status,
                        "completion for task not marked active"
                    );
                }
                task.status = TaskStatus::Finished;
            }
            None => {
                warn!(worker = from.0, shard = task_id.shard, "completion for unassigned task");
                return Ok(None);
            }
        }

        let task_time = now - worker.last_task_start;
        worker.total_runtime += task_time;
        worker.ping(now);

        let stats = self.method_stats.entry(&run.kernel, &run.method);
        stats.shard_time += task_time;
        stats.shard_calls += 1;

        debug!(worker = from.0, shard = task_id.shard, task_s = task_time, "reaped task");
        Ok(Some(from))
    }

    /// Two-phase quiescence: repeat flush rounds until every alive worker
    /// reports zero updates done, then tell everyone to apply.
    async fn flush_and_apply(&mut self) -> Result<(), MasterError> {
        loop {
            self.network.broadcast(WorkerMessage::Flush);
            let mut awaiting: HashSet<WorkerId> = self.alive_workers().into_iter().collect();
            let expected = awaiting.len();
            let mut quiescent = true;
            let mut received = 0usize;

            while !awaiting.is_empty() {
                let Some(env) = self.network.try_read(MessageTag::FlushDone) else {
                    sleep(self.config.sleep_time).await;
                    continue;
                };
                let MasterMessage::FlushDone(response) = env.msg else {
                    continue;
                };
                if !awaiting.remove(&env.from) {
                    continue;
                }
                received += 1;
                if response.updates_done > 0 {
                    quiescent = false;
                }
                debug!(
                    worker = env.from.0,
                    received,
                    expected,
                    updates_done = response.updates_done,
                    "flush response"
                );
            }

            if quiescent {
                break;
            }
        }

        self.network.broadcast(WorkerMessage::Apply);
        debug!("apply broadcast sent");
        Ok(())
    }

    fn dump_progress(&self, run: &RunDescriptor) {
        let per_worker: Vec<String> = self
            .workers
            .iter()
            .map(|w| format!("{}/{}", w.num_finished(&self.arena), w.num_assigned()))
            .collect();
        debug!(
            method = %run.method,
            shards = run.shards.len(),
            dispatched = self.dispatched,
            finished = self.finished,
            progress = per_worker.join(" "),
            "barrier progress"
        );
    }

    /// Dump final stats, tell every worker to exit, and drain whatever is
    /// still sitting in the master mailbox.
    pub async fn shutdown(mut self) {
        info!(total_runtime_s = self.now(), "master shutting down");
        for worker in &self.workers {
            info!(
                worker = worker.id.0,
                execution_s = worker.total_runtime,
                "worker execution time"
            );
        }
        for (name, stats) in self.method_stats.iter() {
            info!(
                method = name,
                calls = stats.calls,
                shard_calls = stats.shard_calls,
                avg_s = stats.avg_completion_time(),
                total_s = stats.total_time,
                "kernel stats"
            );
        }
        self.network.broadcast(WorkerMessage::Shutdown);
        self.drain_mailbox();
    }

    /// Best-effort sweep of every inbound message kind until the transport
    /// reports empty. Late completions and stray acks die here instead of
    /// lingering in the buffers.
    fn drain_mailbox(&mut self) {
        const TAGS: [MessageTag; 4] = [
            MessageTag::Register,
            MessageTag::AssignmentAck,
            MessageTag::KernelDone,
            MessageTag::FlushDone,
        ];
        let mut drained = 0usize;
        loop {
            let mut progressed = false;
            for tag in TAGS {
                if self.network.try_read(tag).is_some() {
                    drained += 1;
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        if drained > 0 {
            debug!(drained, "drained stale messages at shutdown");
        }
    }
}
