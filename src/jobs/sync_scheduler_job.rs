use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::services::scheduler::SyncScheduler;

/// Spawn the scheduler loop. It runs until `shutdown` flips to true and
/// returns only after in-flight runs have finished.
pub fn start_sync_scheduler_job(
    scheduler: Arc<SyncScheduler>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // Run immediately on startup, then on every tick
        tracing::info!("Running initial sync pass");
        scheduler.run(shutdown).await;
    })
}
