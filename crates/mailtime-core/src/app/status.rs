//! Status - tick の結果と health の集約ビュー

use serde::Serialize;

use crate::ports::HealthReport;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Tasks produced by `due_tasks`.
    pub examined: usize,
    /// Tasks this process claimed.
    pub claimed: usize,
    pub sent: usize,
    pub rescheduled: usize,
    /// Gave up after the last allowed attempt.
    pub failed: usize,
    /// Stale snapshots, lost claims and storage errors.
    pub skipped: usize,
}

impl TickReport {
    pub(crate) fn absorb(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Skipped => self.skipped += 1,
            TaskOutcome::Sent => {
                self.claimed += 1;
                self.sent += 1;
            }
            TaskOutcome::Rescheduled => {
                self.claimed += 1;
                self.rescheduled += 1;
            }
            TaskOutcome::Failed => {
                self.claimed += 1;
                self.failed += 1;
            }
        }
    }
}

/// Per-task result inside a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskOutcome {
    Skipped,
    Sent,
    Rescheduled,
    Failed,
}

/// Store health plus scheduler health once the engine has been started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueHealth {
    pub store: HealthReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<HealthReport>,
}

impl QueueHealth {
    pub fn is_ok(&self) -> bool {
        self.store.is_ok() && self.scheduler.as_ref().is_none_or(HealthReport::is_ok)
    }

    /// Worst of the two codes.
    pub fn code(&self) -> u16 {
        self.scheduler
            .as_ref()
            .map_or(self.store.code, |s| s.code.max(self.store.code))
    }
}
