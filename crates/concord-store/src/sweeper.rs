use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::memory::MemoryStore;

/// Background task that purges expired session records.
///
/// Reads already ignore expired records; this loop only reclaims memory
/// held by sessions nobody came back for.
pub async fn run_expiry_loop(store: Arc<MemoryStore>, interval: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let count = store.purge_expired().await;
                if count > 0 {
                    info!("Sweeper: purged {} expired session records", count);
                }
            }
        }
    }

    debug!("Session sweeper stopped");
}
