//! Shard-to-worker assignment.
//!
//! Initial assignment balances shard counts across alive workers; after
//! that, ownership only moves through work stealing or worker death.
//! Every mutation ends with a synchronous assignment broadcast so workers
//! route updates correctly before the next dispatch.

use tracing::{info, warn};

use crate::error::MasterError;
use crate::master::{Master, RunDescriptor};
use crate::messages::{MessageTag, ShardAssignment, ShardAssignments, WorkerMessage};
use crate::task::{TableId, TaskId, TaskState, TaskStatus, WorkerId};

impl Master {
    /// The alive owner of `(table, shard)`, if any. This is the routing
    /// map exposed to tables for client operations.
    pub fn worker_for_shard(&self, table: TableId, shard: u32) -> Option<WorkerId> {
        let id = TaskId::new(table, shard);
        self.workers
            .iter()
            .filter(|w| self.alive(w.id))
            .find(|w| w.serves(id))
            .map(|w| w.id)
    }

    /// Alive worker with the fewest owned shards, ties broken by lower id.
    fn least_loaded_worker(&self) -> Result<usize, MasterError> {
        let mut best: Option<usize> = None;
        for (slot, worker) in self.workers.iter().enumerate() {
            if !self.alive(worker.id) {
                continue;
            }
            let better = match best {
                None => true,
                Some(current) => worker.shards.len() < self.workers[current].shards.len(),
            };
            if better {
                best = Some(slot);
            }
        }
        best.ok_or(MasterError::NoAliveWorker)
    }

    /// Ensure `(table, shard)` has an owner and give that owner a fresh
    /// unit-size task for the current epoch.
    pub(crate) fn assign_worker(
        &mut self,
        table: TableId,
        shard: u32,
    ) -> Result<WorkerId, MasterError> {
        let id = TaskId::new(table, shard);
        let work_size = 1;

        if let Some(owner) = self.worker_for_shard(table, shard) {
            let index = self.arena.insert(TaskState::new(id, work_size));
            self.workers[owner.0].assign_task(id, index);
            return Ok(owner);
        }

        let slot = self.least_loaded_worker()?;
        info!(table = table.0, shard, worker = slot, "assigning shard");
        self.workers[slot].assign_shard(id);
        let index = self.arena.insert(TaskState::new(id, work_size));
        self.workers[slot].assign_task(id, index);
        Ok(WorkerId(slot))
    }

    /// Give every shard of every registered table an owner. Runs once,
    /// before the first kernel.
    pub(crate) fn assign_tables(&mut self) -> Result<(), MasterError> {
        let all: Vec<(TableId, u32)> = self
            .tables
            .tables()
            .flat_map(|t| t.shards().map(move |s| (t.id, s)))
            .collect();
        for (table, shard) in all {
            self.assign_worker(table, shard)?;
        }
        Ok(())
    }

    /// Create this epoch's tasks: one per requested shard, placed on the
    /// shard's owner. Prior epoch state is dropped wholesale.
    pub(crate) fn assign_tasks(&mut self, run: &RunDescriptor) -> Result<(), MasterError> {
        for worker in &mut self.workers {
            worker.clear_tasks();
        }
        self.arena.clear();
        for &shard in &run.shards {
            self.assign_worker(run.table, shard)?;
        }
        Ok(())
    }

    /// Snapshot of every owned shard, in worker order.
    pub fn assignment_snapshot(&self) -> ShardAssignments {
        let mut snapshot = ShardAssignments::default();
        for worker in &self.workers {
            for id in &worker.shards {
                snapshot.assign.push(ShardAssignment {
                    new_worker: worker.id,
                    table: id.table,
                    shard: id.shard,
                });
            }
        }
        snapshot
    }

    /// Broadcast the ownership map and wait until every alive worker has
    /// acknowledged it.
    pub(crate) async fn send_assignments(&mut self) -> Result<(), MasterError> {
        let snapshot = self.assignment_snapshot();
        let alive = self.alive_workers();
        self.network
            .sync_broadcast(
                WorkerMessage::Assignment(snapshot),
                MessageTag::AssignmentAck,
                &alive,
            )
            .await?;
        Ok(())
    }

    /// Declare a worker dead and repair the ownership invariant.
    ///
    /// Every shard the worker owned moves to the least loaded survivor.
    /// Unfinished tasks, in-flight ones included, are recreated `Pending`
    /// on the new owner; the refreshed map is broadcast before returning
    /// so nothing is dispatched against stale routing.
    pub async fn mark_worker_dead(&mut self, id: WorkerId) -> Result<(), MasterError> {
        if !self.dead_workers.insert(id) {
            return Ok(());
        }
        warn!(worker = id.0, "marking worker dead");

        let shards = std::mem::take(&mut self.workers[id.0].shards);
        let work = std::mem::take(&mut self.workers[id.0].work);

        for task_id in shards {
            let slot = self.least_loaded_worker()?;
            self.workers[slot].assign_shard(task_id);

            if let Some(&index) = work.get(&task_id) {
                let lost = self.arena.get(index).clone();
                if lost.status == TaskStatus::Finished {
                    continue;
                }
                if lost.status == TaskStatus::Active {
                    // The in-flight run is considered lost; it has to be
                    // dispatched again.
                    self.dispatched = self.dispatched.saturating_sub(1);
                }
                let mut recreated = TaskState::new(task_id, lost.size);
                recreated.stolen = lost.stolen;
                let new_index = self.arena.insert(recreated);
                self.workers[slot].assign_task(task_id, new_index);
                info!(
                    table = task_id.table.0,
                    shard = task_id.shard,
                    worker = slot,
                    "reassigned task from dead worker"
                );
            }
        }

        if self.shards_assigned {
            self.send_assignments().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::kernel::KernelRegistry;
    use crate::master::Master;
    use crate::test_util::{master_with_links, test_config};

    fn assert_unique_ownership(master: &Master) {
        for table in master.table_ids() {
            let descriptor = master.table(table).unwrap();
            for shard in descriptor.shards() {
                let id = TaskId::new(table, shard);
                let owners = master
                    .workers()
                    .iter()
                    .filter(|w| master.is_alive(w.id) && w.serves(id))
                    .count();
                assert_eq!(owners, 1, "table {} shard {shard} has {owners} owners", table.0);
            }
        }
    }

    #[test]
    fn initial_assignment_balances_by_count() {
        let (mut master, _links) = master_with_links(test_config(4), Arc::new(KernelRegistry::default()));
        master.create_table(8);
        master.assign_tables().unwrap();

        for worker in master.workers() {
            assert_eq!(worker.shards.len(), 2);
        }
        // Ties break toward the lower id, so assignment round-robins.
        let w0: Vec<u32> = master.workers()[0].shards.iter().map(|t| t.shard).collect();
        assert_eq!(w0, vec![0, 4]);
        assert_unique_ownership(&master);
    }

    #[test]
    fn assign_worker_reuses_existing_owner() {
        let (mut master, _links) = master_with_links(test_config(2), Arc::new(KernelRegistry::default()));
        let table = master.create_table(2);
        master.assign_tables().unwrap();

        let owner = master.worker_for_shard(table, 1).unwrap();
        let again = master.assign_worker(table, 1).unwrap();
        assert_eq!(owner, again);
        assert_eq!(master.workers()[owner.0].shards.len(), 1);
    }

    #[test]
    fn assignment_fails_with_no_alive_workers() {
        let (mut master, _links) = master_with_links(test_config(2), Arc::new(KernelRegistry::default()));
        let table = master.create_table(1);
        master.dead_workers.insert(WorkerId(0));
        master.dead_workers.insert(WorkerId(1));

        let err = master.assign_worker(table, 0).unwrap_err();
        assert!(matches!(err, MasterError::NoAliveWorker));
    }

    #[tokio::test]
    async fn dead_worker_tasks_are_recreated_pending() {
        let (mut master, _links) = master_with_links(test_config(2), Arc::new(KernelRegistry::default()));
        let table = master.create_table(4);
        master.assign_tables().unwrap();

        let run = RunDescriptor::new("K", "m", table, vec![0, 1, 2, 3]);
        master.assign_tasks(&run).unwrap();
        master.dispatched = master.dispatch_work(&run);
        assert_eq!(master.dispatched, 2);

        master.mark_worker_dead(WorkerId(0)).await.unwrap();

        assert!(master.workers()[0].shards.is_empty());
        assert!(master.workers()[0].work.is_empty());
        assert_eq!(master.workers()[1].shards.len(), 4);
        assert_eq!(master.workers()[1].work.len(), 4);
        // The in-flight task on worker 0 was lost, so it no longer counts
        // as dispatched.
        assert_eq!(master.dispatched, 1);
        assert_unique_ownership(&master);
    }

    #[tokio::test]
    async fn mark_worker_dead_is_idempotent() {
        let (mut master, _links) = master_with_links(test_config(2), Arc::new(KernelRegistry::default()));
        master.create_table(2);
        master.assign_tables().unwrap();

        master.mark_worker_dead(WorkerId(1)).await.unwrap();
        let owned = master.workers()[0].shards.len();
        master.mark_worker_dead(WorkerId(1)).await.unwrap();
        assert_eq!(master.workers()[0].shards.len(), owned);
    }
}
