//! Scheduler module driving the periodic probing cycle.

mod pass;

pub use pass::*;

use crate::db::{CheckStore, DbError, ProbeRecord};
use crate::notify::{BroadcastReport, NotificationTrigger};
use crate::probe::{PoolConfig, ProbePool};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Pause between two passes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(300);

/// Scheduler error types.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,
    #[error("scheduler is not running")]
    NotRunning,
    #[error("no target registered for {0}")]
    UnknownTarget(String),
    #[error("storage error: {0}")]
    Store(#[from] DbError),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub pool: PoolConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_PROBE_INTERVAL,
            pool: PoolConfig::default(),
        }
    }
}

struct Running {
    pool: Arc<ProbePool>,
    stop_tx: broadcast::Sender<()>,
    _handle: JoinHandle<()>,
}

/// The main scheduler that orchestrates probe passes.
///
/// Stopped until [`Scheduler::start`]; a stopped scheduler can be started
/// again and begins with a fresh pool and an immediate pass.
pub struct Scheduler {
    store: Arc<dyn CheckStore>,
    notifications: Arc<NotificationTrigger>,
    config: SchedulerConfig,
    running: Mutex<Option<Running>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn CheckStore>,
        notifications: Arc<NotificationTrigger>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            notifications,
            config,
            running: Mutex::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.state().is_some()
    }

    /// Start the probing loop. The first pass runs right away.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut state = self.state();
        if state.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let pool = Arc::new(self.new_pool()?);
        let (stop_tx, stop_rx) = broadcast::channel(1);

        let handle = tokio::spawn(run_loop(
            self.store.clone(),
            self.notifications.clone(),
            pool.clone(),
            self.config.interval,
            stop_rx,
        ));

        *state = Some(Running {
            pool,
            stop_tx,
            _handle: handle,
        });

        tracing::info!(
            "Scheduler: Started, probing every {}s",
            self.config.interval.as_secs_f64()
        );
        Ok(())
    }

    /// Stop the probing loop.
    ///
    /// The loop exits at its next sleep boundary. Probes already dispatched
    /// keep their own handle on the pool and still record their results.
    pub fn stop(&self) -> Result<(), SchedulerError> {
        let running = self.state().take().ok_or(SchedulerError::NotRunning)?;
        let _ = running.stop_tx.send(());
        tracing::info!("Scheduler: Stopped");
        Ok(())
    }

    /// Probe one registered URL outside the regular cadence and record it.
    ///
    /// Uses the running pool if there is one, otherwise a throwaway pool that
    /// is dropped once the probe completes.
    pub async fn probe_now(&self, url: &str) -> Result<ProbeRecord, SchedulerError> {
        let target = self
            .store
            .find_target_by_url(url)?
            .ok_or_else(|| SchedulerError::UnknownTarget(url.to_string()))?;

        let shared = self.state().as_ref().map(|r| r.pool.clone());
        let pool = match shared {
            Some(pool) => pool,
            None => Arc::new(self.new_pool()?),
        };

        let probe = pool.probe(&target).await;
        if let Some(e) = &probe.error {
            tracing::warn!("Immediate probe of {}: {}", target.url, e);
        }
        self.store.record(&probe.record)?;
        Ok(probe.record)
    }

    fn new_pool(&self) -> Result<ProbePool, SchedulerError> {
        ProbePool::new(&self.config.pool).map_err(|e| SchedulerError::Client(e.to_string()))
    }
}

async fn run_loop(
    store: Arc<dyn CheckStore>,
    notifications: Arc<NotificationTrigger>,
    pool: Arc<ProbePool>,
    interval: Duration,
    mut stop_rx: broadcast::Receiver<()>,
) {
    log_pass(&run_pass(&store, &pool).await);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = tokio::time::sleep(interval) => {
                log_pass(&run_pass(&store, &pool).await);
                log_broadcast(&notifications.broadcast_periodic().await);
            }
        }
    }

    tracing::debug!("Scheduler: Loop exited");
}

fn log_pass(report: &PassReport) {
    if report.listing_error.is_some() {
        tracing::warn!("Scheduler: Pass skipped, target list unavailable");
    } else if !report.failures.is_empty() {
        tracing::warn!(
            "Scheduler: {} of {} results were not recorded",
            report.failures.len(),
            report.targets
        );
    }
}

fn log_broadcast(report: &BroadcastReport) {
    if report.enumerate_error.is_some() {
        tracing::warn!("Scheduler: Reports skipped, user list unavailable");
    } else {
        tracing::info!(
            "Scheduler: {} reports delivered, {} failed",
            report.delivered,
            report.failures.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Store, Target, UserNotificationSummary};
    use crate::notify::{Notifier, NotifyError};
    use crate::probe::testing::spawn_server;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::NamedTempFile;

    #[derive(Default)]
    struct CountingNotifier {
        delivered: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn deliver(
            &self,
            _user_id: i64,
            _recipient: &str,
            _summary: &UserNotificationSummary,
        ) -> Result<(), NotifyError> {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        _tmp: NamedTempFile,
        store: Arc<Store>,
        notifier: Arc<CountingNotifier>,
        scheduler: Scheduler,
        target: Target,
    }

    fn fixture(url: String, interval: Duration) -> Fixture {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let user = store.add_user("alice", Some("alice@example.com")).unwrap();
        let mut target = Target {
            url,
            user_id: user,
            ..Default::default()
        };
        store.add_target(&mut target).unwrap();

        let notifier = Arc::new(CountingNotifier::default());
        let trigger = Arc::new(NotificationTrigger::new(store.clone(), notifier.clone()));
        let config = SchedulerConfig {
            interval,
            pool: PoolConfig {
                timeout: Duration::from_secs(5),
                system_proxy: false,
                ..Default::default()
            },
        };
        let scheduler = Scheduler::new(store.clone(), trigger, config);

        Fixture {
            _tmp: tmp,
            store,
            notifier,
            scheduler,
            target,
        }
    }

    impl Fixture {
        fn records(&self) -> usize {
            self.store.history(self.target.id, None, None).unwrap().len()
        }

        async fn wait_for_records(&self, at_least: usize) {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
            while self.records() < at_least {
                assert!(
                    tokio::time::Instant::now() < deadline,
                    "expected at least {} records, found {}",
                    at_least,
                    self.records()
                );
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_runs_initial_pass_immediately() {
        let server = spawn_server().await;
        let fx = fixture(server.url("/ok"), Duration::from_secs(3600));

        fx.scheduler.start().unwrap();
        assert!(fx.scheduler.is_running());
        fx.wait_for_records(1).await;

        fx.scheduler.stop().unwrap();
        assert!(!fx.scheduler.is_running());
        // The first pass is not followed by a broadcast
        assert_eq!(fx.notifier.delivered.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_and_stop_are_state_checked() {
        let server = spawn_server().await;
        let fx = fixture(server.url("/ok"), Duration::from_secs(3600));

        assert!(matches!(fx.scheduler.stop(), Err(SchedulerError::NotRunning)));
        fx.scheduler.start().unwrap();
        assert!(matches!(fx.scheduler.start(), Err(SchedulerError::AlreadyRunning)));
        fx.scheduler.stop().unwrap();
        assert!(matches!(fx.scheduler.stop(), Err(SchedulerError::NotRunning)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_restart_resumes_passes() {
        let server = spawn_server().await;
        let fx = fixture(server.url("/ok"), Duration::from_secs(3600));

        fx.scheduler.start().unwrap();
        fx.wait_for_records(1).await;
        fx.scheduler.stop().unwrap();

        fx.scheduler.start().unwrap();
        fx.wait_for_records(2).await;
        fx.scheduler.stop().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_loop_repeats_and_broadcasts() {
        let server = spawn_server().await;
        let fx = fixture(server.url("/ok"), Duration::from_millis(100));

        fx.scheduler.start().unwrap();
        fx.wait_for_records(3).await;
        fx.scheduler.stop().unwrap();
        assert!(fx.notifier.delivered.load(Ordering::SeqCst) >= 1);

        // Let any in-flight pass settle, then no further passes happen
        tokio::time::sleep(Duration::from_millis(400)).await;
        let settled = fx.records();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(fx.records(), settled);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_lets_dispatched_probes_record() {
        let server = spawn_server().await;
        let fx = fixture(server.url("/hold"), Duration::from_secs(3600));
        let mut targets = vec![fx.target.clone()];
        for i in 0..3 {
            let mut target = Target {
                url: server.url(&format!("/hold?n={}", i)),
                user_id: fx.target.user_id,
                ..Default::default()
            };
            fx.store.add_target(&mut target).unwrap();
            targets.push(target);
        }

        fx.scheduler.start().unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while server.peak.load(Ordering::SeqCst) == 0 {
            assert!(tokio::time::Instant::now() < deadline, "no probe reached the server");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        fx.scheduler.stop().unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        for target in &targets {
            while fx.store.history(target.id, None, None).unwrap().is_empty() {
                assert!(
                    tokio::time::Instant::now() < deadline,
                    "target {} was never recorded",
                    target.id
                );
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_probe_now_without_running_scheduler() {
        let server = spawn_server().await;
        let fx = fixture(server.url("/missing"), Duration::from_secs(3600));

        let record = fx.scheduler.probe_now(&server.url("/missing")).await.unwrap();
        assert_eq!(record.target_id, fx.target.id);
        assert_eq!(record.response_code, 404);
        assert_eq!(fx.records(), 1);

        let unknown = fx.scheduler.probe_now("https://unknown.example").await;
        assert!(matches!(unknown, Err(SchedulerError::UnknownTarget(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_probe_now_with_running_scheduler() {
        let server = spawn_server().await;
        let fx = fixture(server.url("/ok"), Duration::from_secs(3600));

        fx.scheduler.start().unwrap();
        fx.wait_for_records(1).await;

        let record = fx.scheduler.probe_now(&server.url("/ok")).await.unwrap();
        assert_eq!(record.response_code, 200);
        assert_eq!(fx.records(), 2);

        fx.scheduler.stop().unwrap();
    }
}
