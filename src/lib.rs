//! Piccolo - master control plane for a distributed in-memory key-value
//! table framework.
//!
//! User computations are kernels run shard-by-shard over partitioned
//! tables. This crate implements the coordinator that makes that work:
//!
//! ## Control plane
//!
//! - [`Master`]: owns shard ownership, per-epoch task state, worker
//!   liveness and method timing stats; drives each kernel epoch from
//!   dispatch through the flush/apply quiescence barrier
//! - [`RunDescriptor`]: one kernel epoch (kernel, method, table, shards)
//! - work stealing: pending tasks migrate from straggling workers to idle
//!   ones when the payoff beats the move cost
//!
//! ## Registries
//!
//! - [`KernelRegistry`]: explicit registration of kernels and their
//!   methods, shared between the master and in-process workers
//! - table metadata and routing via [`table::TableRegistry`]
//!
//! ## Messaging
//!
//! - [`messages`]: typed master/worker payloads
//! - [`Transport`]: messaging seam; [`InProcNetwork`] is the in-process
//!   channel mesh, [`InProcWorker`] the matching worker loop

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod kernel;
pub mod master;
pub mod messages;
pub mod planner;
pub mod stats;
pub mod stealer;
pub mod table;
pub mod task;
pub mod transport;
pub mod worker;
pub mod worker_state;

#[cfg(test)]
pub(crate) mod test_util;

// Configuration
pub use config::MasterConfig;

// Control plane
pub use error::MasterError;
pub use master::{Master, RunDescriptor};

// Registries
pub use kernel::{KernelContext, KernelOutput, KernelRegistry};
pub use table::{TableDescriptor, TableRegistry};

// Identities and state
pub use stats::{MethodStats, MethodStatsMap};
pub use task::{TableId, TaskId, TaskStatus, WorkerId};
pub use worker_state::WorkerState;

// Messaging
pub use messages::{KernelRequest, ShardAssignment, ShardInfo};
pub use transport::{InProcNetwork, Transport, WorkerLink};
pub use worker::InProcWorker;
