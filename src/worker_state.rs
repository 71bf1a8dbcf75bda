//! Master-side view of one worker slot.

use std::collections::{BTreeMap, BTreeSet};

use crate::task::{TaskArena, TaskId, TaskStatus, WorkerId};

/// Everything the master tracks about one worker: the shards it serves,
/// the tasks assigned to it this epoch, and timing state.
///
/// Task records live in the epoch's [`TaskArena`]; `work` maps task ids to
/// arena indices. A task in `work` is normally backed by an owned shard;
/// during a steal the two move together in one step.
#[derive(Debug)]
pub struct WorkerState {
    pub id: WorkerId,

    /// Table shards this worker is authoritative owner of.
    pub shards: BTreeSet<TaskId>,

    /// Tasks assigned for the current kernel epoch.
    pub work: BTreeMap<TaskId, usize>,

    /// Seconds since master start, refreshed on every reap from this worker.
    pub last_ping_time: f64,
    pub last_task_start: f64,
    pub total_runtime: f64,

    /// Reserved; not consulted by the barrier.
    pub checkpointing: bool,
}

impl WorkerState {
    pub fn new(id: WorkerId, now: f64) -> Self {
        Self {
            id,
            shards: BTreeSet::new(),
            work: BTreeMap::new(),
            last_ping_time: now,
            last_task_start: 0.0,
            total_runtime: 0.0,
            checkpointing: false,
        }
    }

    pub fn serves(&self, id: TaskId) -> bool {
        self.shards.contains(&id)
    }

    pub fn is_assigned(&self, id: TaskId) -> bool {
        self.work.contains_key(&id)
    }

    pub fn assign_shard(&mut self, id: TaskId) {
        self.shards.insert(id);
    }

    pub fn remove_shard(&mut self, id: TaskId) {
        self.shards.remove(&id);
    }

    pub fn assign_task(&mut self, id: TaskId, index: usize) {
        self.work.insert(id, index);
    }

    pub fn remove_task(&mut self, id: TaskId) -> Option<usize> {
        self.work.remove(&id)
    }

    pub fn clear_tasks(&mut self) {
        self.work.clear();
    }

    pub fn ping(&mut self, now: f64) {
        self.last_ping_time = now;
    }

    pub fn num_assigned(&self) -> usize {
        self.work.len()
    }

    fn count(&self, arena: &TaskArena, status: TaskStatus) -> usize {
        self.work
            .values()
            .filter(|&&idx| arena.get(idx).status == status)
            .count()
    }

    pub fn num_pending(&self, arena: &TaskArena) -> usize {
        self.count(arena, TaskStatus::Pending)
    }

    pub fn num_active(&self, arena: &TaskArena) -> usize {
        self.count(arena, TaskStatus::Active)
    }

    pub fn num_finished(&self, arena: &TaskArena) -> usize {
        self.count(arena, TaskStatus::Finished)
    }

    /// Pending task with the highest scheduling weight, ties broken by
    /// lower task id.
    pub fn best_pending(&self, arena: &TaskArena) -> Option<(TaskId, usize)> {
        let mut best: Option<(TaskId, usize)> = None;
        for (&id, &index) in &self.work {
            let task = arena.get(index);
            if task.status != TaskStatus::Pending {
                continue;
            }
            let better = match best {
                None => true,
                Some((_, current)) => task.weight() > arena.get(current).weight(),
            };
            if better {
                best = Some((id, index));
            }
        }
        best
    }

    /// Seconds this worker has been without runnable work.
    ///
    /// Zero until every assigned task is finished; clamped at zero so a
    /// ping recorded after `now` was sampled cannot go negative.
    pub fn idle_time(&self, arena: &TaskArena, now: f64) -> f64 {
        if self.num_finished(arena) != self.work.len() {
            return 0.0;
        }
        (now - self.last_ping_time).max(0.0)
    }
}
