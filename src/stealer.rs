//! Work stealing.
//!
//! When a worker goes idle while another still has a queue of pending
//! tasks, one pending task (and its shard ownership) may migrate. The
//! migration only happens when the thief's estimated time savings beat
//! the cost of moving the shard's state over and back.

use tracing::info;

use crate::master::{Master, RunDescriptor};
use crate::task::{TaskStatus, WorkerId};

/// Estimated cost of migrating a task, in the same units as `eta`.
///
/// The factor of two reflects paying once to receive the shard's state
/// and once to return results.
fn move_cost(task_size: f64, avg_completion_time: f64, avg_size: f64) -> f64 {
    (2.0 * task_size * avg_completion_time / avg_size).max(1.0)
}

impl Master {
    /// Attempt a single steal into idle worker `dst`. Returns whether
    /// shard ownership changed; the caller re-broadcasts assignments
    /// before dispatching again.
    pub(crate) fn steal_work(
        &mut self,
        run: &RunDescriptor,
        dst: WorkerId,
        avg_completion_time: f64,
    ) -> bool {
        if !self.config.work_stealing || !self.alive(dst) {
            return false;
        }

        // Victim: the alive worker with the deepest pending queue, ties
        // broken by lower id.
        let mut src: Option<(usize, usize)> = None;
        for (slot, worker) in self.workers.iter().enumerate() {
            if !self.alive(worker.id) {
                continue;
            }
            let pending = worker.num_pending(&self.arena);
            let better = match src {
                None => true,
                Some((_, deepest)) => pending > deepest,
            };
            if better {
                src = Some((slot, pending));
            }
        }
        let Some((src, pending)) = src else {
            return false;
        };
        if pending == 0 {
            return false;
        }

        let Some((task_id, index)) = self.workers[src].best_pending(&self.arena) else {
            return false;
        };
        // At most one migration per task per epoch.
        if self.arena.get(index).stolen {
            return false;
        }

        // Shard sizes are nominal (1.0 each), so their mean is too.
        let num_shards = self
            .tables
            .table(run.table)
            .map(|t| t.num_shards.max(1))
            .unwrap_or(1);
        let avg_size = (0..num_shards).map(|_| 1.0).sum::<f64>() / f64::from(num_shards);

        let task_size = self.arena.get(index).size as f64;
        let cost = move_cost(task_size, avg_completion_time, avg_size);
        let eta: f64 = self.workers[src]
            .work
            .values()
            .map(|&idx| self.arena.get(idx))
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| (t.size as f64 * avg_completion_time / avg_size).max(1.0))
            .sum();

        if eta <= cost {
            return false;
        }

        info!(
            src = src,
            dst = dst.0,
            shard = task_id.shard,
            size = task_size,
            eta,
            move_cost = cost,
            "stealing task"
        );

        self.arena.get_mut(index).stolen = true;
        self.workers[src].remove_shard(task_id);
        self.workers[src].remove_task(task_id);
        self.workers[dst.0].assign_shard(task_id);
        self.workers[dst.0].assign_task(task_id, index);
        true
    }
}
