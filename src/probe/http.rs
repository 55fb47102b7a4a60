//! HTTP probe implementation.

use std::time::{Duration, Instant};

use chrono::Utc;

use super::{Probe, ProbeError};
use crate::db::{ProbeRecord, ProbeStatus, Target};

/// Run one HTTP GET against the target and classify the outcome.
///
/// Never fails: every outcome, including timeouts and connection errors, is
/// folded into a record with the elapsed time in milliseconds. Codes below
/// 400 count as success; anything without a response is recorded with code 0.
pub async fn run_http_probe(client: &reqwest::Client, target: &Target, timeout: Duration) -> Probe {
    let start = Instant::now();
    let outcome = client.get(&target.url).send().await;
    let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    let (status, response_code, error) = match outcome {
        Ok(response) => {
            let code = response.status().as_u16();
            if code < 400 {
                (ProbeStatus::Success, code, None)
            } else {
                (ProbeStatus::Error, code, Some(ProbeError::HttpStatus(code)))
            }
        }
        Err(e) => (ProbeStatus::Error, 0, Some(classify_error(&e, timeout))),
    };

    match &error {
        None => tracing::debug!("{}: {} ({}ms)", target.url, response_code, latency_ms),
        Some(e) => tracing::debug!("{}: {} ({}ms)", target.url, e, latency_ms),
    }

    Probe {
        record: ProbeRecord {
            target_id: target.id,
            timestamp: Utc::now(),
            status,
            response_code,
            latency_ms,
        },
        error,
    }
}

fn classify_error(e: &reqwest::Error, timeout: Duration) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout(timeout)
    } else if e.is_builder() {
        ProbeError::InvalidUrl(e.to_string())
    } else if e.is_connect() {
        ProbeError::Connect(e.to_string())
    } else {
        ProbeError::Request(e.to_string())
    }
}
