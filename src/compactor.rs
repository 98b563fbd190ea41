use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::engine::Engine;

/// Background task that compacts the journal once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

/// One compactor pass. Returns whether a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        debug!("compactor skip: {appends} append(s) since last compaction");
        return false;
    }
    match engine.compact_wal().await {
        Ok(events) => {
            info!("compacted journal after {appends} append(s) into {events} event(s)");
            true
        }
        Err(e) => {
            tracing::error!("journal compaction failed: {e}");
            false
        }
    }
}
