//! Shared helpers for crate-internal tests.

use std::sync::Arc;
use std::time::Duration;

use crate::config::MasterConfig;
use crate::kernel::KernelRegistry;
use crate::master::Master;
use crate::transport::{InProcNetwork, WorkerLink};

pub(crate) fn test_config(num_workers: usize) -> MasterConfig {
    MasterConfig {
        num_workers,
        work_stealing: true,
        sleep_time: Duration::from_millis(1),
    }
}

/// A master wired to an in-process mesh. The returned links must stay
/// alive for the master's channels to stay open.
pub(crate) fn master_with_links(
    config: MasterConfig,
    registry: Arc<KernelRegistry>,
) -> (Master, Vec<WorkerLink>) {
    let (network, links) = InProcNetwork::with_workers(config.num_workers);
    let master = Master::new(config, Box::new(network), registry);
    (master, links)
}
