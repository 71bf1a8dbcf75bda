//! Kernel dispatch.

use tracing::debug;

use crate::master::{Master, RunDescriptor};
use crate::messages::{KernelRequest, WorkerMessage};
use crate::task::TaskStatus;

impl Master {
    /// Hand one task to every worker that has pending work and nothing in
    /// flight, picking each worker's heaviest pending task first so
    /// stragglers do not dominate tail latency. Returns the number of
    /// kernel requests sent.
    ///
    /// A worker never holds more than one active task; stealing relies on
    /// the rest of a loaded worker's queue staying pending.
    pub(crate) fn dispatch_work(&mut self, run: &RunDescriptor) -> usize {
        let now = self.now();
        let mut num_dispatched = 0;

        for slot in 0..self.workers.len() {
            if self.workers[slot].num_pending(&self.arena) == 0
                || self.workers[slot].num_active(&self.arena) > 0
            {
                continue;
            }
            let Some((task_id, index)) = self.workers[slot].best_pending(&self.arena) else {
                continue;
            };

            self.arena.get_mut(index).status = TaskStatus::Active;
            self.workers[slot].last_task_start = now;

            let request = KernelRequest {
                kernel: run.kernel.clone(),
                method: run.method.clone(),
                table: task_id.table,
                shard: task_id.shard,
            };
            self.network
                .send(self.workers[slot].id, WorkerMessage::RunKernel(request));
            debug!(worker = slot, table = task_id.table.0, shard = task_id.shard, "dispatched");
            num_dispatched += 1;
        }

        num_dispatched
    }
}
