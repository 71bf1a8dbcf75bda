//! Typed messages exchanged between the master and its workers.
//!
//! Payloads are plain structs with serde derives so a transport can encode
//! them however it likes; the in-process mesh in [`crate::transport`] moves
//! them over channels untouched.

use serde::{Deserialize, Serialize};

use crate::task::{TableId, TaskId, WorkerId};

/// Worker hello, read once per slot at startup.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RegisterWorker {
    pub slot: usize,
}

/// One entry of the shard ownership map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardAssignment {
    pub new_worker: WorkerId,
    pub table: TableId,
    pub shard: u32,
}

/// Full ownership snapshot, broadcast synchronously whenever assignment
/// changes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ShardAssignments {
    pub assign: Vec<ShardAssignment>,
}

/// Instruction to run one kernel method over one shard.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KernelRequest {
    pub kernel: String,
    pub method: String,
    pub table: TableId,
    pub shard: u32,
}

impl KernelRequest {
    pub fn task_id(&self) -> TaskId {
        TaskId::new(self.table, self.shard)
    }
}

/// Per-partition metadata reported with a completed shard.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ShardInfo {
    pub table: TableId,
    pub shard: u32,
    pub entries: u64,
}

/// Completion report for one dispatched kernel request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KernelDone {
    pub request: KernelRequest,
    pub shards: Vec<ShardInfo>,
}

/// Reply to a flush broadcast; nonzero `updates_done` means the worker was
/// still draining buffered updates and the system is not yet quiescent.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct FlushResponse {
    pub updates_done: u64,
}

/// Messages sent master to worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum WorkerMessage {
    Assignment(ShardAssignments),
    RunKernel(KernelRequest),
    Flush,
    Apply,
    Shutdown,
}

/// Messages sent worker to master.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum MasterMessage {
    Register(RegisterWorker),
    AssignmentAck,
    KernelDone(KernelDone),
    FlushDone(FlushResponse),
}

/// Message kind used for selective reads from the master mailbox.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageTag {
    Register,
    AssignmentAck,
    KernelDone,
    FlushDone,
}

impl MasterMessage {
    pub fn tag(&self) -> MessageTag {
        match self {
            MasterMessage::Register(_) => MessageTag::Register,
            MasterMessage::AssignmentAck => MessageTag::AssignmentAck,
            MasterMessage::KernelDone(_) => MessageTag::KernelDone,
            MasterMessage::FlushDone(_) => MessageTag::FlushDone,
        }
    }
}

/// A worker message together with its source.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub from: WorkerId,
    pub msg: MasterMessage,
}
