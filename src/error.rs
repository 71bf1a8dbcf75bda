//! Error types for the master control plane.

use thiserror::Error;

use crate::task::TableId;

/// Errors surfaced by [`crate::Master`].
///
/// Precondition violations (unknown kernel, unknown method, missing table,
/// overlapping runs) are programmer errors: callers are expected to treat
/// them as fatal and exit with the diagnostic. Transient conditions such as
/// an empty mailbox are handled internally by polling and never surface
/// here.
#[derive(Debug, Error)]
pub enum MasterError {
    #[error("invalid kernel class '{0}'")]
    UnknownKernel(String),

    #[error("kernel '{kernel}' has no method '{method}'")]
    UnknownMethod { kernel: String, method: String },

    #[error("table {0:?} is not registered; table locality must be specified")]
    UnknownTable(TableId),

    #[error("cannot start kernel before previous one is finished ({remaining} tasks outstanding)")]
    RunInProgress { remaining: usize },

    #[error("ran out of workers; increase the number of partitions per worker")]
    NoAliveWorker,

    #[error("transport channel closed")]
    Disconnected,
}
