//! Scheduled cleanup of expired short-lived records.

use crate::db::Database;
use std::time::Duration;
use tracing::{error, info};

/// Interval between cleanup runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60); // 1 hour

/// Run all cleanup tasks once.
pub async fn run_cleanup(db: &Database) {
    match db.codes().cleanup_expired().await {
        Ok(count) if count > 0 => info!("Cleaned up {} expired verification codes", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up verification codes: {}", e),
    }

    match db.oauth_states().cleanup_expired().await {
        Ok(count) if count > 0 => info!("Cleaned up {} abandoned OAuth states", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up OAuth states: {}", e),
    }

    // Revocations are only needed until the token would have expired anyway
    match db.revoked_tokens().cleanup_expired().await {
        Ok(count) if count > 0 => info!("Cleaned up {} stale token revocations", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up token revocations: {}", e),
    }
}

/// Spawn a background task that runs cleanup periodically.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(db: Database) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            interval.tick().await;
            run_cleanup(&db).await;
        }
    })
}
