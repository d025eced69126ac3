//! In-memory task store.
//!
//! 単一プロセス用。テストと開発（demo バイナリ）で使います。
//! すべての操作は 1 つの Mutex の中で完結するので、claim / cancel は自然に原子的です。

use std::collections::HashMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::Mutex;

use crate::domain::{MailTask, Recipient, TaskId};
use crate::ports::{DueTasks, HealthReport, QueueBinding, StoreError, TaskPatch, TaskStore};

#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<HashMap<TaskId, MailTask>>,
    binding: OnceLock<QueueBinding>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored copy of a task, if it still exists.
    pub async fn get(&self, id: &TaskId) -> Option<MailTask> {
        self.tasks.lock().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }

    fn binding(&self) -> Result<QueueBinding, StoreError> {
        self.binding.get().copied().ok_or(StoreError::NotBound)
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn bind(&self, binding: QueueBinding) {
        // first engine wins
        let _ = self.binding.set(binding);
    }

    async fn health_check(&self) -> HealthReport {
        if self.binding.get().is_none() {
            return HealthReport::not_bound();
        }
        HealthReport::ok()
    }

    async fn due_tasks(&self, now: DateTime<Utc>) -> Result<DueTasks<'_>, StoreError> {
        let binding = self.binding()?;
        let mut due: Vec<MailTask> = self
            .tasks
            .lock()
            .await
            .values()
            .filter(|task| task.is_due(now, binding.max_attempts))
            .cloned()
            .collect();
        due.sort_by_key(|task| task.scheduled_at);
        Ok(futures::stream::iter(due.into_iter().map(Ok)).boxed())
    }

    async fn find_pending_for_recipient(
        &self,
        recipient: &Recipient,
        before: DateTime<Utc>,
    ) -> Result<Option<MailTask>, StoreError> {
        self.binding()?;
        let key = recipient.grouping_key();
        let tasks = self.tasks.lock().await;
        Ok(tasks
            .values()
            .filter(|task| {
                task.is_open() && task.scheduled_at <= before && task.recipient.grouping_key() == key
            })
            .max_by_key(|task| task.scheduled_at)
            .cloned())
    }

    async fn insert(&self, task: &MailTask) -> Result<(), StoreError> {
        self.binding()?;
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&task.id) {
            return Err(StoreError::backend(format!("duplicate task id {}", task.id)));
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn cancel(&self, id: &TaskId) -> Result<bool, StoreError> {
        let binding = self.binding()?;
        let mut tasks = self.tasks.lock().await;
        if !tasks.get(id).is_some_and(MailTask::is_open) {
            return Ok(false);
        }
        if binding.keep_history {
            if let Some(task) = tasks.get_mut(id) {
                task.cancelled = true;
            }
        } else {
            tasks.remove(id);
        }
        Ok(true)
    }

    async fn delete(&self, task: &MailTask) -> Result<bool, StoreError> {
        Ok(self.tasks.lock().await.remove(&task.id).is_some())
    }

    async fn mutate(&self, task: &MailTask, patch: &TaskPatch) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.lock().await;
        let Some(stored) = tasks.get_mut(&task.id) else {
            return Ok(false);
        };
        if !patch.guard_holds(stored) {
            return Ok(false);
        }
        patch.apply_to(stored);
        Ok(true)
    }
}
