//! Shutdown flips a process-wide flag, so this lives in its own test binary.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{SimulatedMarket, block, ts};
use nftline_core::{ProgressContext, request_shutdown};
use nftline_ingest::{MemorySink, RunExit, SchedulerConfig, run};
use nftline_queue::{Dataset, DurableQueue, MemoryQueue, Phase};

#[tokio::test]
async fn shutdown_checkpoints_in_flight_work() {
    let market = Arc::new(SimulatedMarket::new((0..10).map(ts), 100).failing_forever(429));
    let queue = DurableQueue::new(Arc::new(MemoryQueue::new()));
    let seeded = block(Dataset::Sales, 0, 3_600);
    queue.insert_block(&seeded).await.unwrap();

    let mut config = SchedulerConfig::new(Dataset::Sales);
    config.workers = 1;
    config.use_backup = false;
    config.retry.rate_limit_delay = Duration::from_millis(20);
    let progress = Arc::new(ProgressContext::hidden());

    let (summary, ()) = tokio::join!(
        run(
            config,
            queue.clone(),
            market.clone(),
            Arc::new(MemorySink::new()),
            &progress
        ),
        async {
            while market.requests() < 4 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            request_shutdown();
        }
    );

    let summary = summary.unwrap();
    assert!(summary.interrupted());
    assert_eq!(summary.exit, RunExit::Interrupted);
    assert_eq!(summary.stats.stored, 0);

    // The rate-limited worker is still partitioning its block
    let checkpoint = queue.get_backup(Dataset::Sales).unwrap();
    assert_eq!(checkpoint.workers.len(), 1);
    assert_eq!(checkpoint.workers[0].block, seeded);
    assert_eq!(checkpoint.workers[0].phase, Phase::Partitioning);
    assert!(!checkpoint.workers[0].is_resumable());
}
