//! End-to-end kernel epochs over the in-process mesh.

use std::sync::Arc;
use std::time::Duration;

use piccolo::{
    InProcNetwork, InProcWorker, KernelOutput, KernelRegistry, Master, MasterConfig, MasterError,
    RunDescriptor, TableId, WorkerId,
};
use tokio::task::JoinHandle;

fn config(num_workers: usize, work_stealing: bool) -> MasterConfig {
    MasterConfig {
        num_workers,
        work_stealing,
        sleep_time: Duration::from_millis(1),
    }
}

/// Spawn `num_workers` in-process workers and a master wired to them, and
/// wait for registration.
async fn start_cluster(
    num_workers: usize,
    work_stealing: bool,
    registry: Arc<KernelRegistry>,
) -> (Master, Vec<JoinHandle<()>>) {
    let (network, links) = InProcNetwork::with_workers(num_workers);
    let handles: Vec<_> = links
        .into_iter()
        .map(|link| InProcWorker::spawn(link, Arc::clone(&registry)))
        .collect();
    let mut master = Master::new(
        config(num_workers, work_stealing),
        Box::new(network),
        registry,
    );
    master.wait_for_workers().await.expect("registration");
    (master, handles)
}

async fn stop(master: Master, handles: Vec<JoinHandle<()>>) {
    master.shutdown().await;
    for handle in handles {
        handle.await.expect("worker exited cleanly");
    }
}

fn assert_unique_ownership(master: &Master, table: TableId, num_shards: u32) {
    for shard in 0..num_shards {
        let owner = master.worker_for_shard(table, shard);
        assert!(owner.is_some(), "shard {shard} has no owner");
        let owners = master
            .workers()
            .iter()
            .filter(|w| master.is_alive(w.id) && w.serves(piccolo::TaskId::new(table, shard)))
            .count();
        assert_eq!(owners, 1, "shard {shard} has {owners} owners");
    }
}

#[tokio::test(start_paused = true)]
async fn single_worker_single_shard() {
    let mut registry = KernelRegistry::default();
    registry.register("Checksum").method("build", |_ctx| async {
        KernelOutput {
            entries: 7,
            remote_updates: 0,
        }
    });
    let registry = Arc::new(registry);
    let (mut master, handles) = start_cluster(1, false, Arc::clone(&registry)).await;

    let table = master.create_table(1);
    master
        .run(RunDescriptor::new("Checksum", "build", table, vec![0]))
        .await
        .unwrap();

    assert_eq!(master.finished(), 1);
    assert_eq!(master.dispatched(), 1);
    assert_eq!(master.worker_for_shard(table, 0), Some(WorkerId(0)));
    let entries = master.table(table).unwrap().partition(0).unwrap().entries;
    assert_eq!(entries, 7);

    stop(master, handles).await;
}

#[tokio::test(start_paused = true)]
async fn eight_shards_balance_over_four_workers() {
    let mut registry = KernelRegistry::default();
    registry
        .register("Touch")
        .method("noop", |_ctx| async { KernelOutput::default() });
    let registry = Arc::new(registry);
    let (mut master, handles) = start_cluster(4, false, Arc::clone(&registry)).await;

    let table = master.create_table(8);
    master
        .run(RunDescriptor::new(
            "Touch",
            "noop",
            table,
            (0..8).collect(),
        ))
        .await
        .unwrap();

    assert_eq!(master.finished(), 8);
    assert_eq!(master.dispatched(), 8);

    let counts: Vec<usize> = master.workers().iter().map(|w| w.shards.len()).collect();
    let max = *counts.iter().max().unwrap();
    let min = *counts.iter().min().unwrap();
    assert!(max - min <= 1, "unbalanced assignment: {counts:?}");
    assert_eq!(counts.iter().sum::<usize>(), 8);
    assert_unique_ownership(&master, table, 8);

    stop(master, handles).await;
}

#[tokio::test(start_paused = true)]
async fn buffered_updates_extend_the_flush_phase() {
    // Shard 0 leaves three updates buffered for other shards, so the
    // barrier needs an extra flush round before it may apply.
    let mut registry = KernelRegistry::default();
    registry
        .register("Scatter")
        .method("push_updates", |ctx| async move {
            KernelOutput {
                entries: 1,
                remote_updates: if ctx.shard == 0 { 3 } else { 0 },
            }
        });
    let registry = Arc::new(registry);
    let (mut master, handles) = start_cluster(2, false, Arc::clone(&registry)).await;

    let table = master.create_table(2);
    master
        .run(RunDescriptor::new(
            "Scatter",
            "push_updates",
            table,
            vec![0, 1],
        ))
        .await
        .unwrap();

    assert_eq!(master.finished(), 2);
    stop(master, handles).await;
}

#[tokio::test(start_paused = true)]
async fn invalid_descriptors_fail_before_any_dispatch() {
    let mut registry = KernelRegistry::default();
    registry
        .register("Sum")
        .method("fold", |_ctx| async { KernelOutput::default() });
    let registry = Arc::new(registry);
    let (mut master, handles) = start_cluster(1, false, Arc::clone(&registry)).await;

    let table = master.create_table(2);

    let err = master
        .run(RunDescriptor::new("Sum", "unknown", table, vec![0, 1]))
        .await
        .unwrap_err();
    assert!(matches!(err, MasterError::UnknownMethod { .. }));

    let err = master
        .run(RunDescriptor::new("Nope", "fold", table, vec![0, 1]))
        .await
        .unwrap_err();
    assert!(matches!(err, MasterError::UnknownKernel(_)));

    let err = master
        .run(RunDescriptor::new("Sum", "fold", TableId(99), vec![0]))
        .await
        .unwrap_err();
    assert!(matches!(err, MasterError::UnknownTable(_)));

    // Nothing was mutated: no epoch started, nothing dispatched.
    assert_eq!(master.kernel_epoch(), 0);
    assert_eq!(master.dispatched(), 0);
    assert!(master.workers()[0].work.is_empty());
    assert!(master.workers()[0].shards.is_empty());

    stop(master, handles).await;
}

#[tokio::test(start_paused = true)]
async fn dead_worker_is_replanned_before_the_next_epoch() {
    let mut registry = KernelRegistry::default();
    registry
        .register("Touch")
        .method("noop", |_ctx| async { KernelOutput::default() });
    let registry = Arc::new(registry);
    let (mut master, handles) = start_cluster(2, false, Arc::clone(&registry)).await;

    let table = master.create_table(4);
    let run = RunDescriptor::new("Touch", "noop", table, vec![0, 1, 2, 3]);
    master.run(run.clone()).await.unwrap();
    assert_unique_ownership(&master, table, 4);

    master.mark_worker_dead(WorkerId(1)).await.unwrap();
    for shard in 0..4 {
        assert_eq!(master.worker_for_shard(table, shard), Some(WorkerId(0)));
    }

    master.run(run).await.unwrap();
    assert_eq!(master.finished(), 4);
    assert_unique_ownership(&master, table, 4);

    stop(master, handles).await;
}

#[tokio::test(start_paused = true)]
async fn stats_accumulate_across_epochs() {
    let mut registry = KernelRegistry::default();
    registry
        .register("Touch")
        .method("noop", |_ctx| async { KernelOutput::default() });
    let registry = Arc::new(registry);
    let (mut master, handles) = start_cluster(2, false, Arc::clone(&registry)).await;

    let table = master.create_table(4);
    let run = RunDescriptor::new("Touch", "noop", table, vec![0, 1, 2, 3]);

    let mut last_shard_calls = 0;
    for epoch in 1..=3u64 {
        master.run(run.clone()).await.unwrap();
        let stats = master.method_stats().get("Touch", "noop");
        assert_eq!(stats.calls, epoch);
        assert!(stats.shard_calls > last_shard_calls);
        last_shard_calls = stats.shard_calls;
    }
    assert_eq!(last_shard_calls, 12);
    assert!(master.stats_report().contains("Touch:noop"));

    stop(master, handles).await;
}
