//! Scheduler port - 外部の revolving scheduler（interval 実行）の契約
//!
//! クラスタ全体で「namespace ごとに tick が同時に 1 つだけ走る」ことの保証は
//! scheduler 側の責務です。engine は handler を渡すだけ。
//!
//! # 実装
//! - `impls::LocalScheduler`: 単一プロセス用（tokio::time::interval）

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::health::HealthReport;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("a periodic job is already registered for namespace `{0}`")]
    AlreadyRegistered(String),

    #[error("interval must be greater than zero")]
    ZeroInterval,

    #[error("scheduler is shutting down")]
    ShuttingDown,

    #[error("no Tokio runtime available to drive the interval")]
    NoRuntime,
}

/// The job the scheduler runs on every interval.
#[async_trait]
pub trait TickHandler: Send + Sync {
    async fn on_tick(&self);
}

#[async_trait]
pub trait RevolvingScheduler: Send + Sync {
    /// Run `handler` every `interval`, at most one live invocation per `namespace`.
    fn set_interval(
        &self,
        handler: Arc<dyn TickHandler>,
        interval: Duration,
        namespace: &str,
    ) -> Result<(), SchedulerError>;

    async fn health_check(&self) -> HealthReport;
}
