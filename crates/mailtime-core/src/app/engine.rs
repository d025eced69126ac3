//! MailTime - queue engine
//!
//! enqueue（concatenation / 重複抑止）と tick（claim → compile → send → resolve）を
//! 担当する orchestrator です。
//!
//! # 設計原則
//! - claim は `TaskStore::mutate` + `PatchGuard` の条件付き更新 1 回
//! - tick からエラーを raise しない（結果は EventSink と `TickReport` で観測する）
//! - 1 task の panic で tick 全体を止めない（`catch_unwind`）
//! - グローバルロックは持たない。storage / transport 呼び出しは任意に遅延しうる
//!
//! # 既知の制約
//! - transport のタイムアウトは transport 側の責務。送信がハングするとその task の処理も止まる
//! - `due_tasks` の読み取りから claim までの間に追記された fragment は、その回の送信に含まれない

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{FutureExt, StreamExt};
use tracing::{debug, error, info, warn};

use crate::domain::{DeliveryError, MailFragment, MailRequest, MailTask, MailTimeError, TaskId};
use crate::ports::{
    Clock, EventSink, FailureResolution, IdGenerator, PatchGuard, RevolvingScheduler, SendReport,
    TaskPatch, TaskStore, TickHandler,
};

use super::compiler::MailCompiler;
use super::config::MailTimeConfig;
use super::retry::RetryPolicy;
use super::status::{QueueHealth, TaskOutcome, TickReport};
use super::transport_pool::TransportPool;

/// Lookup + guarded append attempts before a message opens its own task.
const MAX_APPEND_ROUNDS: usize = 8;

/// The queue engine. Cheap to clone; clones share state.
///
/// ```ignore
/// let mail = MailTime::builder()
///     .store(store)
///     .transport(smtp)
///     .build()?;
///
/// let id = mail
///     .enqueue(MailRequest::new("a@x.com").subject("Hi").text("{{name}}").field("name", "Rita"))
///     .await?;
/// mail.start(scheduler)?;
/// ```
#[derive(Clone)]
pub struct MailTime {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) config: MailTimeConfig,
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) pool: TransportPool,
    pub(crate) compiler: MailCompiler,
    pub(crate) retry: RetryPolicy,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) scheduler: OnceLock<Arc<dyn RevolvingScheduler>>,
}

impl MailTime {
    pub fn builder() -> super::builder::MailTimeBuilder {
        super::builder::MailTimeBuilder::new()
    }

    pub(crate) fn from_inner(inner: Inner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &MailTimeConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.inner.store
    }

    /// Schedule a message. Returns the id of the task that will carry it.
    ///
    /// With concatenation enabled the message may join an open task for the
    /// same recipient; an identical message already in that task is not added
    /// twice and the existing id is returned.
    pub async fn enqueue(&self, request: MailRequest) -> Result<TaskId, MailTimeError> {
        let MailRequest {
            fragment,
            send_at,
            template,
            concat_subject,
        } = request;

        if !fragment.has_body() {
            return Err(MailTimeError::MissingBody);
        }
        if !fragment.to.is_valid() {
            return Err(MailTimeError::InvalidRecipient);
        }

        let send_at = send_at.unwrap_or_else(|| self.inner.clock.now());
        let concat = &self.inner.config.concat;

        let scheduled_at = if concat.enabled {
            let delay = chrono::Duration::from_std(concat.delay())
                .map_err(|e| MailTimeError::config(format!("concat delay out of range: {e}")))?;
            let window_end = send_at + delay;
            if let Some(id) = self.concatenate(&fragment, window_end).await? {
                return Ok(id);
            }
            window_end
        } else {
            send_at
        };

        let mut task = MailTask::new(self.inner.ids.generate_task_id(), fragment, scheduled_at);
        task.template = template;
        task.concat_subject = concat_subject;

        self.inner.store.insert(&task).await?;
        debug!(
            task_id = %task.id,
            recipient = %task.recipient,
            send_at = %task.scheduled_at,
            "mail task enqueued"
        );
        Ok(task.id)
    }

    /// `Some(id)` when the fragment now lives in an already open task.
    ///
    /// The append is guarded on the fragment count seen by the lookup; a
    /// concurrent append makes it fail, and the lookup is repeated.
    async fn concatenate(
        &self,
        fragment: &MailFragment,
        window_end: DateTime<Utc>,
    ) -> Result<Option<TaskId>, MailTimeError> {
        let store = &self.inner.store;
        for _ in 0..MAX_APPEND_ROUNDS {
            let Some(open) = store.find_pending_for_recipient(&fragment.to, window_end).await?
            else {
                return Ok(None);
            };

            if open.fragments.iter().any(|existing| existing.is_equivalent(fragment)) {
                debug!(task_id = %open.id, recipient = %fragment.to, "identical message already queued");
                return Ok(Some(open.id));
            }

            let mut fragments = open.fragments.clone();
            fragments.push(fragment.clone());
            let patch = TaskPatch::fragments(fragments).guarded(PatchGuard::Appendable {
                attempts: open.attempts,
                fragments: open.fragments.len(),
            });

            if store.mutate(&open, &patch).await? {
                debug!(
                    task_id = %open.id,
                    recipient = %fragment.to,
                    fragments = open.fragments.len() + 1,
                    "message concatenated into open task"
                );
                return Ok(Some(open.id));
            }
            // claimed, removed or appended to since the lookup
            debug!(task_id = %open.id, "concatenation target changed; looking it up again");
        }

        warn!(
            recipient = %fragment.to,
            rounds = MAX_APPEND_ROUNDS,
            "concatenation kept conflicting; opening a new task"
        );
        Ok(None)
    }

    /// `true` only the first time a not-yet-claimed task is cancelled.
    pub async fn cancel(&self, id: &TaskId) -> bool {
        match self.inner.store.cancel(id).await {
            Ok(cancelled) => {
                debug!(task_id = %id, cancelled, "cancel requested");
                cancelled
            }
            Err(e) => {
                warn!(task_id = %id, error = %e, "cancel failed in storage");
                false
            }
        }
    }

    /// Dispatch every due task once. Never fails; see [`TickReport`].
    ///
    /// A producer-only engine does nothing here.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        if !self.inner.config.mode.is_consumer() {
            return report;
        }

        let inner = &self.inner;
        let now = inner.clock.now();
        let due = match inner.store.due_tasks(now).await {
            Ok(due) => due,
            Err(e) => {
                warn!(store = inner.store.name(), error = %e, "could not list due tasks");
                return report;
            }
        };

        let mut outcomes = due
            .map(|item| async move {
                match item {
                    Ok(task) => inner.process(task).await,
                    Err(e) => {
                        warn!(store = inner.store.name(), error = %e, "skipping unreadable task");
                        TaskOutcome::Skipped
                    }
                }
            })
            .buffer_unordered(inner.config.tick_concurrency.max(1));

        while let Some(outcome) = outcomes.next().await {
            report.examined += 1;
            report.absorb(outcome);
        }
        report
    }

    /// Register the tick with `scheduler`. Producer-only engines register nothing.
    pub fn start(&self, scheduler: Arc<dyn RevolvingScheduler>) -> Result<(), MailTimeError> {
        let config = &self.inner.config;
        if !config.mode.is_consumer() {
            debug!(prefix = %config.prefix, "producer mode: not registering a tick");
            return Ok(());
        }

        scheduler.set_interval(Arc::new(self.clone()), config.tick_interval(), &config.prefix)?;
        // first scheduler wins for health reporting
        let _ = self.inner.scheduler.set(scheduler);
        info!(
            prefix = %config.prefix,
            interval_ms = config.tick_interval_ms,
            "mail queue started"
        );
        Ok(())
    }

    pub async fn health_check(&self) -> QueueHealth {
        let store = self.inner.store.health_check().await;
        let scheduler = match self.inner.scheduler.get() {
            Some(scheduler) => Some(scheduler.health_check().await),
            None => None,
        };
        QueueHealth { store, scheduler }
    }
}

impl std::fmt::Debug for MailTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailTime")
            .field("prefix", &self.inner.config.prefix)
            .field("store", &self.inner.store.name())
            .field("transports", &self.inner.pool)
            .finish()
    }
}

#[async_trait]
impl TickHandler for MailTime {
    async fn on_tick(&self) {
        let report = self.tick().await;
        if report.examined > 0 {
            debug!(
                examined = report.examined,
                sent = report.sent,
                rescheduled = report.rescheduled,
                failed = report.failed,
                skipped = report.skipped,
                "tick finished"
            );
        }
    }
}

impl Inner {
    /// claim → send → resolve for one task.
    async fn process(&self, task: MailTask) -> TaskOutcome {
        // stale snapshot
        if !task.is_open() {
            return TaskOutcome::Skipped;
        }

        let previous = task.attempts;
        let attempts = previous.saturating_add(1);
        match self.store.mutate(&task, &TaskPatch::claim(previous, attempts)).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(task_id = %task.id, "claim lost to another worker");
                return TaskOutcome::Skipped;
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "claim failed; task stays pending");
                return TaskOutcome::Skipped;
            }
        }

        let mut task = task;
        task.attempts = attempts;
        task.sent = true;

        let index = self.pool.select(task.transport_index);
        debug!(task_id = %task.id, attempts, transport = index, "task claimed");

        let result = AssertUnwindSafe(self.deliver(index, &task))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic_message(panic.as_ref());
                error!(task_id = %task.id, panic = %message, "dispatch panicked");
                Err(DeliveryError::Panicked(message))
            });

        match result {
            Ok(report) => self.on_delivered(&task, index, &report).await,
            Err(error) => self.handle_error(&task, index, &error).await,
        }
    }

    async fn deliver(&self, index: usize, task: &MailTask) -> Result<SendReport, DeliveryError> {
        let transport = self.pool.get(index).ok_or(DeliveryError::NoTransport(index))?;
        let message = self.compiler.compile(transport.as_ref(), task)?;
        let report = transport
            .send(&message)
            .await
            .map_err(|source| DeliveryError::Transport { index, source })?;
        if report.accepted.is_empty() {
            return Err(DeliveryError::NotAccepted);
        }
        Ok(report)
    }

    async fn on_delivered(&self, task: &MailTask, index: usize, report: &SendReport) -> TaskOutcome {
        // history mode keeps the claim marker `isSent = true` as the terminal state
        if !self.config.keep_history {
            if let Err(e) = self.store.delete(task).await {
                warn!(task_id = %task.id, error = %e, "sent task could not be removed");
            }
        }
        info!(
            task_id = %task.id,
            attempts = task.attempts,
            transport = index,
            recipient = %task.first_recipient(),
            "email sent"
        );
        self.events.on_sent(task, report);
        TaskOutcome::Sent
    }

    async fn handle_error(&self, task: &MailTask, index: usize, failure: &DeliveryError) -> TaskOutcome {
        if task.attempts >= self.config.max_attempts {
            let written = if self.config.keep_history {
                self.store.mutate(task, &TaskPatch::fail()).await
            } else {
                self.store.delete(task).await
            };
            if let Err(e) = written {
                warn!(task_id = %task.id, error = %e, "could not finalize failed task");
            }
            error!(
                task_id = %task.id,
                attempts = task.attempts,
                recipient = %task.first_recipient(),
                error = %failure,
                "giving up sending email"
            );
            self.events.on_error(task, failure, FailureResolution::GaveUp);
            return TaskOutcome::Failed;
        }

        let transport_index = self.pool.after_failure(index, task.attempts);
        let retry_at = self.retry.retry_at(self.clock.now(), task.attempts);
        match self
            .store
            .mutate(task, &TaskPatch::reschedule(retry_at, transport_index))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(task_id = %task.id, "task left the store before it could be rescheduled");
            }
            Err(e) => warn!(task_id = %task.id, error = %e, "could not reschedule failed task"),
        }
        warn!(
            task_id = %task.id,
            attempts = task.attempts,
            max_attempts = self.config.max_attempts,
            transport = transport_index,
            retry_at = %retry_at,
            error = %failure,
            "send failed; rescheduled"
        );
        self.events.on_error(
            task,
            failure,
            FailureResolution::Rescheduled {
                retry_at,
                transport_index,
            },
        );
        TaskOutcome::Rescheduled
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
