//! Single-process simulation: a master driving in-process workers over a
//! synthetic kernel with skewed per-shard cost.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use piccolo::{
    InProcNetwork, InProcWorker, KernelOutput, KernelRegistry, Master, MasterConfig, RunDescriptor,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "piccolo-sim", about = "Run a synthetic kernel over in-process workers")]
struct Args {
    /// Number of worker slots.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Number of table shards.
    #[arg(long, default_value_t = 16)]
    shards: u32,

    /// Kernel epochs to run.
    #[arg(long, default_value_t = 3)]
    epochs: u32,

    /// Disable work stealing.
    #[arg(long)]
    no_stealing: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut registry = KernelRegistry::default();
    registry.register("Synthetic").method("busy_loop", |ctx| async move {
        // Higher shard indices cost more, so late shards straggle.
        let cost = Duration::from_millis(10 + u64::from(ctx.shard) * 5);
        tokio::time::sleep(cost).await;
        KernelOutput {
            entries: 100 + u64::from(ctx.shard),
            remote_updates: u64::from(ctx.shard % 2),
        }
    });
    let registry = Arc::new(registry);

    let config = MasterConfig {
        num_workers: args.workers,
        work_stealing: !args.no_stealing,
        sleep_time: Duration::from_millis(1),
    };

    let (network, links) = InProcNetwork::with_workers(args.workers);
    let handles: Vec<_> = links
        .into_iter()
        .map(|link| InProcWorker::spawn(link, Arc::clone(&registry)))
        .collect();

    let mut master = Master::new(config, Box::new(network), registry);
    master.wait_for_workers().await?;

    let table = master.create_table(args.shards);
    for epoch in 0..args.epochs {
        let run = RunDescriptor::new(
            "Synthetic",
            "busy_loop",
            table,
            (0..args.shards).collect(),
        );
        master.run(run).await?;
        info!(epoch, finished = master.finished(), "epoch complete");
    }

    println!("{}", master.stats_report());
    master.shutdown().await;
    for handle in handles {
        handle.await?;
    }
    Ok(())
}
