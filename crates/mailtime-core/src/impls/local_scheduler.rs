//! LocalScheduler - 単一プロセス用の RevolvingScheduler
//!
//! namespace ごとに tokio task を 1 つ起動し、`tokio::time::interval` で tick を回します。
//! tick は前回の完了を待ってから次を実行する（重ならない）。遅れた tick は後ろにずらす。
//!
//! クラスタ全体での single-flight は保証しません。複数プロセスで同じ namespace を
//! 回す場合でも、重複送信は store 側の claim が防ぎます。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::ports::{HealthReport, RevolvingScheduler, SchedulerError, TickHandler};

/// Scheduler handle.
/// - `request_shutdown()` で全 namespace のループが止まる（実行中の tick は最後まで走る）
/// - `shutdown_and_join()` で全ループの終了を待てる
pub struct LocalScheduler {
    shutdown_tx: watch::Sender<bool>,
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl LocalScheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop taking new ticks. In-flight ticks are not cancelled.
    pub fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Shutdown and wait for every tick loop.
    pub async fn shutdown_and_join(&self) {
        self.request_shutdown();
        let joins: Vec<(String, JoinHandle<()>)> = self.jobs().drain().collect();
        for (namespace, join) in joins {
            if let Err(e) = join.await {
                debug!(namespace, error = %e, "tick loop ended abnormally");
            }
        }
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LocalScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalScheduler")
            .field("namespaces", &self.namespaces())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

#[async_trait]
impl RevolvingScheduler for LocalScheduler {
    /// Must be called from within a Tokio runtime.
    fn set_interval(
        &self,
        handler: Arc<dyn TickHandler>,
        interval: Duration,
        namespace: &str,
    ) -> Result<(), SchedulerError> {
        if interval.is_zero() {
            return Err(SchedulerError::ZeroInterval);
        }
        if self.is_shutting_down() {
            return Err(SchedulerError::ShuttingDown);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        let mut jobs = self.jobs();
        if jobs.contains_key(namespace) {
            return Err(SchedulerError::AlreadyRegistered(namespace.to_string()));
        }

        let shutdown_rx = self.shutdown_tx.subscribe();
        let name = namespace.to_string();
        let join = runtime.spawn(tick_loop(name, handler, interval, shutdown_rx));
        jobs.insert(namespace.to_string(), join);

        info!(namespace, interval_ms = interval.as_millis() as u64, "periodic tick registered");
        Ok(())
    }

    async fn health_check(&self) -> HealthReport {
        if self.is_shutting_down() {
            return HealthReport::unavailable("scheduler is shut down");
        }
        let stopped: Vec<String> = self
            .jobs()
            .iter()
            .filter(|(_, join)| join.is_finished())
            .map(|(namespace, _)| namespace.clone())
            .collect();
        if stopped.is_empty() {
            HealthReport::ok()
        } else {
            HealthReport::error(format!("tick loop stopped for: {}", stopped.join(", ")))
        }
    }
}

async fn tick_loop(
    namespace: String,
    handler: Arc<dyn TickHandler>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                // scheduler dropped
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        handler.on_tick().await;
    }

    debug!(namespace, "tick loop stopped");
}
