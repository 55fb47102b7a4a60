//! One probing pass over every tracked target.

use crate::db::{CheckStore, DbError};
use crate::probe::ProbePool;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Per-target failure inside a pass.
#[derive(Error, Debug)]
pub enum PassError {
    #[error("failed to store result: {0}")]
    Store(#[from] DbError),
    #[error("probe task failed: {0}")]
    Task(String),
}

/// Summary of a completed pass.
#[derive(Debug, Default)]
pub struct PassReport {
    /// Targets a probe was dispatched for
    pub targets: usize,
    /// Probes recorded with status "success"
    pub succeeded: usize,
    /// Probes recorded with status "error"
    pub failed_probes: usize,
    /// Targets whose outcome could not be recorded
    pub failures: Vec<(i64, PassError)>,
    /// Set when the target list could not be loaded
    pub listing_error: Option<PassError>,
}

/// Probe every current target concurrently and record each outcome.
///
/// All probes are awaited. A failing probe is a recorded outcome, not a
/// pass failure; a failing write or a panicked task only affects its own
/// target. Nothing is propagated to the caller.
pub async fn run_pass(store: &Arc<dyn CheckStore>, pool: &Arc<ProbePool>) -> PassReport {
    let mut report = PassReport::default();

    let targets = match store.list_all_targets() {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("Pass: Failed to list targets: {}", e);
            report.listing_error = Some(e.into());
            return report;
        }
    };

    if targets.is_empty() {
        tracing::info!("Pass: No targets to monitor yet");
        return report;
    }

    tracing::info!("Pass: Checking {} targets", targets.len());
    report.targets = targets.len();

    let mut handles = Vec::with_capacity(targets.len());
    for target in targets {
        let store = store.clone();
        let pool = pool.clone();
        let target_id = target.id;

        let handle = tokio::spawn(async move {
            // Spread the connection burst at the start of a pass
            let jitter = rand::random::<u64>() % 100;
            tokio::time::sleep(Duration::from_millis(jitter)).await;

            let probe = pool.probe(&target).await;
            match &probe.error {
                None => tracing::info!(
                    "{}: {} {} ({}ms)",
                    target.url,
                    probe.record.status,
                    probe.record.response_code,
                    probe.record.latency_ms
                ),
                Some(e) => tracing::warn!(
                    "{}: {} {} ({}ms)",
                    target.url,
                    probe.record.status,
                    e,
                    probe.record.latency_ms
                ),
            }

            store.record(&probe.record)?;
            Ok::<_, DbError>(probe)
        });
        handles.push((target_id, handle));
    }

    for (target_id, handle) in handles {
        match handle.await {
            Ok(Ok(probe)) if probe.is_success() => report.succeeded += 1,
            Ok(Ok(_)) => report.failed_probes += 1,
            Ok(Err(e)) => {
                tracing::error!("Pass: Failed to record result for target {}: {}", target_id, e);
                report.failures.push((target_id, e.into()));
            }
            Err(e) => {
                tracing::error!("Pass: Probe task for target {} failed: {}", target_id, e);
                report.failures.push((target_id, PassError::Task(e.to_string())));
            }
        }
    }

    tracing::info!(
        "Pass: {} up, {} down, {} unrecorded",
        report.succeeded,
        report.failed_probes,
        report.failures.len()
    );

    report
}
