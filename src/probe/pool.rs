//! Shared HTTP client with connection limits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Semaphore;

use super::{run_http_probe, Probe, DEFAULT_PROBE_TIMEOUT, USER_AGENT};
use crate::db::Target;

const MAX_REDIRECTS: usize = 10;

/// Limits and client settings for a probe pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub timeout: Duration,
    /// Maximum probes in flight across all hosts
    pub max_connections: usize,
    /// Maximum probes in flight against one host
    pub max_connections_per_host: usize,
    /// Honor `HTTP_PROXY`/`HTTPS_PROXY` from the environment
    pub system_proxy: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PROBE_TIMEOUT,
            max_connections: 100,
            max_connections_per_host: 10,
            system_proxy: true,
        }
    }
}

/// An HTTP client plus the permits that bound in-flight probes.
///
/// Cloned `Arc` handles may outlive the scheduler's own handle; probes
/// already holding one finish on a fully working client.
pub struct ProbePool {
    client: reqwest::Client,
    timeout: Duration,
    total: Arc<Semaphore>,
    per_host_limit: usize,
    per_host: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl ProbePool {
    pub fn new(config: &PoolConfig) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(config.max_connections_per_host)
            // Monitored targets may present self-signed or broken certificates.
            // Availability is measured regardless of certificate validity.
            .danger_accept_invalid_certs(true);
        if !config.system_proxy {
            builder = builder.no_proxy();
        }

        Ok(Self {
            client: builder.build()?,
            timeout: config.timeout,
            total: Arc::new(Semaphore::new(config.max_connections.max(1))),
            per_host_limit: config.max_connections_per_host.max(1),
            per_host: Mutex::new(HashMap::new()),
        })
    }

    /// Probe a target once the per-host and global permits are available.
    ///
    /// The host permit is taken first so a probe queued behind a busy host
    /// does not hold one of the global slots while it waits.
    pub async fn probe(&self, target: &Target) -> Probe {
        let host = host_key(&target.url);
        let host_sem = host.as_deref().map(|h| self.host_semaphore(h));
        let host_permit = match &host_sem {
            Some(sem) => sem.clone().acquire_owned().await.ok(),
            None => None,
        };
        let total_permit = self.total.clone().acquire_owned().await.ok();

        let probe = run_http_probe(&self.client, target, self.timeout).await;

        drop(total_permit);
        drop(host_permit);
        drop(host_sem);
        if let Some(host) = host {
            self.release_host(&host);
        }
        probe
    }

    fn hosts(&self) -> MutexGuard<'_, HashMap<String, Arc<Semaphore>>> {
        self.per_host.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut hosts = self.hosts();
        hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit)))
            .clone()
    }

    /// Forget a host once no probe holds or waits on its semaphore.
    fn release_host(&self, host: &str) {
        let mut hosts = self.hosts();
        if hosts.get(host).is_some_and(|sem| Arc::strong_count(sem) == 1) {
            hosts.remove(host);
        }
    }
}

/// Per-host limit key. URLs without a host (malformed ones) are only bounded
/// by the global limit.
fn host_key(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    Some(parsed.host_str()?.to_ascii_lowercase())
}
