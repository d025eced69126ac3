//! EventSink port - 配送結果の通知（success / error フック）
//!
//! tick 中の失敗は呼び出し元に raise されないため、
//! 運用側が結果を観測できるのはここだけです。
//!
//! # 実装
//! - `NoopEventSink`: 何もしない（デフォルト）
//! - `CallbackSink`: closure を登録する

use std::fmt;

use chrono::{DateTime, Utc};

use crate::domain::{DeliveryError, MailTask};

use super::transport::SendReport;

/// What the engine did with a task after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureResolution {
    /// Back to pending; next attempt not before `retry_at`, on `transport_index`.
    Rescheduled {
        retry_at: DateTime<Utc>,
        transport_index: usize,
    },
    /// Attempts exhausted; the task is terminal-failed.
    GaveUp,
}

pub trait EventSink: Send + Sync {
    fn on_sent(&self, _task: &MailTask, _report: &SendReport) {}

    fn on_error(&self, _task: &MailTask, _error: &DeliveryError, _resolution: FailureResolution) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {}

type SentHook = Box<dyn Fn(&MailTask, &SendReport) + Send + Sync>;
type ErrorHook = Box<dyn Fn(&MailTask, &DeliveryError, FailureResolution) + Send + Sync>;

/// Closure-based hooks.
///
/// ```ignore
/// let sink = CallbackSink::new()
///     .on_sent(|task, report| println!("{} -> {:?}", task.id, report.accepted))
///     .on_error(|task, error, _| eprintln!("{}: {error}", task.id));
/// ```
#[derive(Default)]
pub struct CallbackSink {
    sent: Option<SentHook>,
    error: Option<ErrorHook>,
}

impl CallbackSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_sent<F>(mut self, f: F) -> Self
    where
        F: Fn(&MailTask, &SendReport) + Send + Sync + 'static,
    {
        self.sent = Some(Box::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&MailTask, &DeliveryError, FailureResolution) + Send + Sync + 'static,
    {
        self.error = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for CallbackSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSink")
            .field("sent", &self.sent.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

impl EventSink for CallbackSink {
    fn on_sent(&self, task: &MailTask, report: &SendReport) {
        if let Some(hook) = &self.sent {
            hook(task, report);
        }
    }

    fn on_error(&self, task: &MailTask, error: &DeliveryError, resolution: FailureResolution) {
        if let Some(hook) = &self.error {
            hook(task, error, resolution);
        }
    }
}
