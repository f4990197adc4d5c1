use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::time::interval;

use crate::engine::PollEngine;

/// Periodically re-checks every poll's counters against its ledger and logs any mismatch.
/// Detection only: a failing poll is left untouched for an operator to inspect.
pub async fn check_poll_integrity_task(engine: Arc<PollEngine>, every: Duration) {
    info!("Starting background poll audit every {}s", every.as_secs());
    let mut interval = interval(every);

    loop {
        interval.tick().await;
        audit_once(&engine).await;
    }
}

/// Returns the number of polls that failed.
pub async fn audit_once(engine: &PollEngine) -> usize {
    match engine.audit().await {
        Ok(report) => {
            for (poll_id, reason) in &report.failures {
                error!("Poll {} failed audit: {}", poll_id, reason);
            }
            if report.failures.is_empty() {
                debug!("Audited {} poll(s), all consistent", report.polls_checked);
            }
            report.failures.len()
        }
        Err(e) => {
            error!("Failed to audit polls: {}", e);
            0
        }
    }
}
