//! In-process worker harness.
//!
//! Runs the worker side of the master protocol inside the same process:
//! it registers its slot, mirrors the shard ownership map, executes
//! kernel methods resolved from the shared registry, and answers the
//! flush/apply rounds. Updates that a kernel buffers for other shards are
//! counted and drained on the first flush, so a busy epoch takes two
//! flush rounds to reach quiescence, just like a real worker.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::kernel::{KernelContext, KernelOutput, KernelRegistry};
use crate::messages::{
    FlushResponse, KernelDone, KernelRequest, MasterMessage, RegisterWorker, ShardInfo,
    WorkerMessage,
};
use crate::task::{TaskId, WorkerId};
use crate::transport::WorkerLink;

pub struct InProcWorker {
    link: WorkerLink,
    kernels: Arc<KernelRegistry>,
    /// Routing map mirrored from the latest assignment broadcast.
    assignments: HashMap<TaskId, WorkerId>,
    /// Updates buffered for other shards since the last flush.
    unflushed: u64,
}

impl InProcWorker {
    pub fn new(link: WorkerLink, kernels: Arc<KernelRegistry>) -> Self {
        Self {
            link,
            kernels,
            assignments: HashMap::new(),
            unflushed: 0,
        }
    }

    /// Spawn the worker loop on the current runtime.
    pub fn spawn(link: WorkerLink, kernels: Arc<KernelRegistry>) -> JoinHandle<()> {
        tokio::spawn(Self::new(link, kernels).run())
    }

    /// Owner of `(table, shard)` per the last assignment broadcast.
    pub fn owner_of(&self, id: TaskId) -> Option<WorkerId> {
        self.assignments.get(&id).copied()
    }

    pub async fn run(mut self) {
        self.link.send(MasterMessage::Register(RegisterWorker {
            slot: self.link.id.0,
        }));

        while let Some(msg) = self.link.inbox.recv().await {
            match msg {
                WorkerMessage::Assignment(map) => {
                    self.assignments = map
                        .assign
                        .iter()
                        .map(|a| (TaskId::new(a.table, a.shard), a.new_worker))
                        .collect();
                    debug!(worker = self.link.id.0, shards = map.assign.len(), "assignment received");
                    self.link.send(MasterMessage::AssignmentAck);
                }
                WorkerMessage::RunKernel(request) => {
                    let output = self.invoke(&request).await;
                    self.unflushed += output.remote_updates;
                    self.link.send(MasterMessage::KernelDone(KernelDone {
                        shards: vec![ShardInfo {
                            table: request.table,
                            shard: request.shard,
                            entries: output.entries,
                        }],
                        request,
                    }));
                }
                WorkerMessage::Flush => {
                    let updates_done = std::mem::take(&mut self.unflushed);
                    self.link
                        .send(MasterMessage::FlushDone(FlushResponse { updates_done }));
                }
                WorkerMessage::Apply => {
                    // Buffered updates were already drained by the flush
                    // round; commit is local.
                }
                WorkerMessage::Shutdown => {
                    debug!(worker = self.link.id.0, "shutting down");
                    break;
                }
            }
        }
    }

    async fn invoke(&self, request: &KernelRequest) -> KernelOutput {
        let invoker = self
            .kernels
            .kernel(&request.kernel)
            .and_then(|k| k.invoker(&request.method));
        match invoker {
            Some(invoker) => {
                let ctx = KernelContext {
                    table: request.table,
                    shard: request.shard,
                    worker: self.link.id,
                };
                invoker(ctx).await
            }
            None => {
                error!(
                    kernel = %request.kernel,
                    method = %request.method,
                    "kernel method not registered on worker"
                );
                KernelOutput::default()
            }
        }
    }
}
