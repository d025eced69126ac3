//! TaskStore port - 永続化された mail task の正本（source of truth）
//!
//! TaskStore は以下を管理します：
//! - task の CRUD（insert / mutate / delete / cancel）
//! - dispatch 対象の走査（due_tasks）
//! - concatenation 先の検索（find_pending_for_recipient）
//!
//! # 実装
//! - `impls::InMemoryTaskStore`（テスト・開発用）
//! - `impls::MongoTaskStore`（feature `mongo`）
//! - `impls::RedisTaskStore`（feature `redis`）
//!
//! # 設計原則
//! - claim は「条件付き更新 1 回」で行う（read-then-write 禁止）。
//!   `TaskPatch::guard` がその条件を表す
//! - cancel も同様に条件付きの delete / update 1 回
//! - concatenation の追記は fragment 数を条件にした更新（`PatchGuard::Appendable`）
//! - prefix（namespace）ごとに独立

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::Serialize;

use crate::domain::{MailFragment, MailTask, Recipient, TaskId};

use super::health::HealthReport;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage adapter is not bound to a mail queue yet")]
    NotBound,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend<T: Into<String>>(msg: T) -> Self {
        Self::Backend(msg.into())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(format!("redis: {err}"))
    }
}

#[cfg(feature = "mongo")]
impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Backend(format!("mongodb: {err}"))
    }
}

#[cfg(feature = "mongo")]
impl From<mongodb::bson::ser::Error> for StoreError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        Self::Backend(format!("bson: {err}"))
    }
}

/// Engine settings a store needs to honour the contract.
///
/// Handed over once by `MailTimeBuilder::build` via [`TaskStore::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueBinding {
    /// `due_tasks` excludes tasks with `attempts >= max_attempts`.
    pub max_attempts: u32,
    /// Terminal tasks are flagged instead of deleted.
    pub keep_history: bool,
    /// Maintain the recipient -> open task pointer (key-value backends).
    pub concat_enabled: bool,
}

/// Precondition for a [`TaskPatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchGuard {
    /// Apply only while the stored task is open (`isSent = isCancelled = isFailed = false`)
    /// and still carries exactly `attempts`. This is the claim compare-and-swap.
    Unclaimed { attempts: u32 },
    /// `Unclaimed` plus exactly `fragments` stored fragments. Fragments only
    /// ever grow, so an unchanged count means an unchanged list.
    Appendable { attempts: u32, fragments: usize },
}

/// Partial update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskPatch {
    #[serde(rename = "tries", skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,

    #[serde(
        rename = "sendAt",
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub scheduled_at: Option<DateTime<Utc>>,

    #[serde(rename = "isSent", skip_serializing_if = "Option::is_none")]
    pub sent: Option<bool>,

    #[serde(rename = "isCancelled", skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<bool>,

    #[serde(rename = "isFailed", skip_serializing_if = "Option::is_none")]
    pub failed: Option<bool>,

    #[serde(rename = "transport", skip_serializing_if = "Option::is_none")]
    pub transport_index: Option<usize>,

    #[serde(rename = "mailOptions", skip_serializing_if = "Option::is_none")]
    pub fragments: Option<Vec<MailFragment>>,

    #[serde(skip)]
    pub guard: Option<PatchGuard>,
}

impl TaskPatch {
    /// Claim for dispatch: `isSent = true, tries = attempts`, guarded on the previous count.
    pub fn claim(previous_attempts: u32, attempts: u32) -> Self {
        Self {
            attempts: Some(attempts),
            sent: Some(true),
            guard: Some(PatchGuard::Unclaimed {
                attempts: previous_attempts,
            }),
            ..Self::default()
        }
    }

    /// Back to pending after a failed attempt.
    pub fn reschedule(scheduled_at: DateTime<Utc>, transport_index: usize) -> Self {
        Self {
            sent: Some(false),
            scheduled_at: Some(scheduled_at),
            transport_index: Some(transport_index),
            ..Self::default()
        }
    }

    /// Terminal failure, kept for history.
    pub fn fail() -> Self {
        Self {
            sent: Some(false),
            failed: Some(true),
            ..Self::default()
        }
    }

    pub fn fragments(fragments: Vec<MailFragment>) -> Self {
        Self {
            fragments: Some(fragments),
            ..Self::default()
        }
    }

    pub fn guarded(mut self, guard: PatchGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_none()
            && self.scheduled_at.is_none()
            && self.sent.is_none()
            && self.cancelled.is_none()
            && self.failed.is_none()
            && self.transport_index.is_none()
            && self.fragments.is_none()
    }

    /// Whether the stored task satisfies the guard.
    pub fn guard_holds(&self, stored: &MailTask) -> bool {
        match self.guard {
            None => true,
            Some(PatchGuard::Unclaimed { attempts }) => {
                stored.is_open() && stored.attempts == attempts
            }
            Some(PatchGuard::Appendable {
                attempts,
                fragments,
            }) => {
                stored.is_open()
                    && stored.attempts == attempts
                    && stored.fragments.len() == fragments
            }
        }
    }

    /// Apply to an in-memory copy.
    pub fn apply_to(&self, task: &mut MailTask) {
        if let Some(attempts) = self.attempts {
            task.attempts = attempts;
        }
        if let Some(scheduled_at) = self.scheduled_at {
            task.scheduled_at = scheduled_at;
        }
        if let Some(sent) = self.sent {
            task.sent = sent;
        }
        if let Some(cancelled) = self.cancelled {
            task.cancelled = cancelled;
        }
        if let Some(failed) = self.failed {
            task.failed = failed;
        }
        if let Some(transport_index) = self.transport_index {
            task.transport_index = transport_index;
        }
        if let Some(fragments) = &self.fragments {
            task.fragments = fragments.clone();
        }
    }
}

/// Lazily produced due tasks. Finite per call; a new call recomputes the set.
pub type DueTasks<'a> = BoxStream<'a, Result<MailTask, StoreError>>;

/// Storage adapter for mail tasks, scoped to one namespace (prefix).
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Short backend name for logs ("memory", "mongo", "redis", ...).
    fn name(&self) -> &str;

    /// Wire the store to an engine. Called once by the builder.
    fn bind(&self, binding: QueueBinding);

    /// Round-trip check. Reports [`HealthReport::not_bound`] before [`TaskStore::bind`].
    async fn health_check(&self) -> HealthReport;

    /// Every task due at `now`. Ordering unspecified.
    async fn due_tasks(&self, now: DateTime<Utc>) -> Result<DueTasks<'_>, StoreError>;

    /// The open task to concatenate into for `recipient`, scheduled at or before `before`.
    async fn find_pending_for_recipient(
        &self,
        recipient: &Recipient,
        before: DateTime<Utc>,
    ) -> Result<Option<MailTask>, StoreError>;

    /// Persist a brand-new task.
    async fn insert(&self, task: &MailTask) -> Result<(), StoreError>;

    /// `true` only the first time an open task leaves the pending set
    /// (deleted, or flagged cancelled in history mode).
    async fn cancel(&self, id: &TaskId) -> Result<bool, StoreError>;

    /// `true` iff a record existed and was removed.
    async fn delete(&self, task: &MailTask) -> Result<bool, StoreError>;

    /// Partial update. `false` means the caller must not assume it happened
    /// (record missing, or the patch guard did not hold).
    async fn mutate(&self, task: &MailTask, patch: &TaskPatch) -> Result<bool, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use ulid::Ulid;

    fn task() -> MailTask {
        MailTask::new(
            TaskId::from_ulid(Ulid::new()),
            MailFragment::new("a@x.com").text("hi"),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn claim_patch_serializes_only_changed_fields() {
        let patch = TaskPatch::claim(0, 1);
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!({"tries": 1, "isSent": true})
        );
    }

    #[test]
    fn claim_guard_rejects_stale_or_claimed_tasks() {
        let mut stored = task();
        assert!(TaskPatch::claim(0, 1).guard_holds(&stored));
        assert!(!TaskPatch::claim(1, 2).guard_holds(&stored));

        stored.sent = true;
        assert!(!TaskPatch::claim(0, 1).guard_holds(&stored));
    }

    #[test]
    fn append_guard_rejects_a_list_that_grew_meanwhile() {
        let mut stored = task();
        let append = TaskPatch::fragments(vec![]).guarded(PatchGuard::Appendable {
            attempts: 0,
            fragments: 1,
        });
        assert!(append.guard_holds(&stored));

        stored.fragments.push(MailFragment::new("a@x.com").text("again"));
        assert!(!append.guard_holds(&stored));

        stored.fragments.truncate(1);
        stored.sent = true;
        assert!(!append.guard_holds(&stored));
    }

    #[test]
    fn apply_to_touches_only_set_fields() {
        let mut stored = task();
        let later = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap();
        TaskPatch::reschedule(later, 1).apply_to(&mut stored);
        assert_eq!(stored.scheduled_at, later);
        assert_eq!(stored.transport_index, 1);
        assert!(!stored.sent);
        assert_eq!(stored.attempts, 0);
        assert_eq!(stored.fragments.len(), 1);
    }

    #[test]
    fn empty_patch_is_detected() {
        assert!(TaskPatch::default().is_empty());
        assert!(!TaskPatch::fail().is_empty());
    }
}
