//! Redis task store (feature `redis`).
//!
//! # キー構成（prefix ごと）
//! - `mailtime:<prefix>:letter:<id>`: task 本体（JSON）
//! - `mailtime:<prefix>:sendat:<id>`: 送信予定時刻（epoch ms）。open な task だけが持つ。
//!   `due_tasks` はこのキーを SCAN する
//! - `mailtime:<prefix>:concatletter:<recipient>`: concatenation 先 task の id。
//!   task の `sendAt` の 128ms 前に期限切れになる
//!
//! # 原子性
//! letter の更新はすべて Lua script による compare-and-set（読んだ payload と
//! 一致する場合のみ書き込む）。競合したら読み直して最大 `MAX_CAS_ROUNDS` 回やり直します。
//! 条件（open か、tries が一致するか）の判定は Rust 側で行うので、payload は
//! serde の表現のまま保存されます。

use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::debug;

use crate::domain::{MailTask, Recipient, TaskId};
use crate::ports::{DueTasks, HealthReport, QueueBinding, StoreError, TaskPatch, TaskStore};

/// Concatenation pointers expire this long before the task's `sendAt`.
const POINTER_LEAD_MS: i64 = 128;
const SCAN_COUNT: usize = 1_000;
const MAX_CAS_ROUNDS: usize = 8;

/// KEYS: letter, sendat. ARGV: expected payload, new payload, sendat marker ("" drops it).
const REPLACE_LUA: &str = r#"
if redis.call('GET', KEYS[1]) ~= ARGV[1] then
  return 0
end
redis.call('SET', KEYS[1], ARGV[2])
if ARGV[3] == '' then
  redis.call('DEL', KEYS[2])
else
  redis.call('SET', KEYS[2], ARGV[3])
end
return 1
"#;

/// KEYS: letter, sendat. ARGV: expected payload.
const REMOVE_LUA: &str = r#"
if redis.call('GET', KEYS[1]) ~= ARGV[1] then
  return 0
end
redis.call('DEL', KEYS[1], KEYS[2])
return 1
"#;

/// Key layout for one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisKeys {
    base: String,
}

impl RedisKeys {
    pub fn new(prefix: &str) -> Self {
        Self {
            base: format!("mailtime:{prefix}"),
        }
    }

    pub fn letter(&self, id: &TaskId) -> String {
        format!("{}:letter:{id}", self.base)
    }

    pub fn sendat(&self, id: &TaskId) -> String {
        format!("{}:sendat:{id}", self.base)
    }

    pub fn concat(&self, recipient: &Recipient) -> String {
        format!("{}:concatletter:{}", self.base, recipient.grouping_key())
    }

    pub fn sendat_pattern(&self) -> String {
        format!("{}:sendat:*", self.base)
    }

    /// Task id encoded in a `sendat` key of this prefix.
    pub fn id_from_sendat(&self, key: &str) -> Option<TaskId> {
        key.strip_prefix(&self.base)?
            .strip_prefix(":sendat:")?
            .parse()
            .ok()
    }
}

enum Write {
    Replace(MailTask),
    Remove,
}

/// `sendat` marker value: only open tasks are scanned.
fn sendat_marker(task: &MailTask) -> String {
    if task.is_open() {
        task.scheduled_at.timestamp_millis().to_string()
    } else {
        String::new()
    }
}

fn pointer_expiry_ms(task: &MailTask) -> i64 {
    task.scheduled_at.timestamp_millis() - POINTER_LEAD_MS
}

pub struct RedisTaskStore {
    conn: MultiplexedConnection,
    keys: RedisKeys,
    replace: redis::Script,
    remove: redis::Script,
    binding: OnceLock<QueueBinding>,
}

impl RedisTaskStore {
    pub fn new(conn: MultiplexedConnection, prefix: &str) -> Self {
        Self {
            conn,
            keys: RedisKeys::new(prefix),
            replace: redis::Script::new(REPLACE_LUA),
            remove: redis::Script::new(REMOVE_LUA),
            binding: OnceLock::new(),
        }
    }

    pub async fn connect(url: &str, prefix: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        debug!(prefix, "connected to redis");
        Ok(Self::new(conn, prefix))
    }

    pub fn keys(&self) -> &RedisKeys {
        &self.keys
    }

    fn binding(&self) -> Result<QueueBinding, StoreError> {
        self.binding.get().copied().ok_or(StoreError::NotBound)
    }

    async fn load(&self, id: &TaskId) -> Result<Option<(String, MailTask)>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.keys.letter(id)).await?;
        match raw {
            Some(raw) => {
                let task = serde_json::from_str(&raw)?;
                Ok(Some((raw, task)))
            }
            None => Ok(None),
        }
    }

    /// Read, decide, compare-and-set. `decide` returning `None` means "leave it".
    async fn update_with<F>(&self, id: &TaskId, decide: F) -> Result<bool, StoreError>
    where
        F: Fn(MailTask) -> Option<Write> + Send + Sync,
    {
        let mut conn = self.conn.clone();
        let letter = self.keys.letter(id);
        let sendat = self.keys.sendat(id);

        for _ in 0..MAX_CAS_ROUNDS {
            let Some((raw, task)) = self.load(id).await? else {
                return Ok(false);
            };
            let Some(write) = decide(task) else {
                return Ok(false);
            };

            let applied: i64 = match write {
                Write::Replace(task) => {
                    let payload = serde_json::to_string(&task)?;
                    self.replace
                        .key(&letter)
                        .key(&sendat)
                        .arg(&raw)
                        .arg(payload)
                        .arg(sendat_marker(&task))
                        .invoke_async(&mut conn)
                        .await?
                }
                Write::Remove => {
                    self.remove
                        .key(&letter)
                        .key(&sendat)
                        .arg(&raw)
                        .invoke_async(&mut conn)
                        .await?
                }
            };
            if applied == 1 {
                return Ok(true);
            }
            debug!(task_id = %id, "letter changed concurrently; retrying");
        }

        Err(StoreError::backend(format!(
            "gave up updating task {id} after {MAX_CAS_ROUNDS} conflicting writes"
        )))
    }

    async fn scan_sendat_keys(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let pattern = self.keys.sendat_pattern();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn load_due(
        &self,
        sendat_key: &str,
        now: DateTime<Utc>,
        binding: QueueBinding,
    ) -> Result<Option<MailTask>, StoreError> {
        let Some(id) = self.keys.id_from_sendat(sendat_key) else {
            return Ok(None);
        };
        let mut conn = self.conn.clone();
        let marker: Option<String> = conn.get(sendat_key).await?;
        let Some(send_at) = marker.and_then(|m| m.parse::<i64>().ok()) else {
            return Ok(None);
        };
        if send_at > now.timestamp_millis() {
            return Ok(None);
        }

        Ok(self
            .load(&id)
            .await?
            .map(|(_, task)| task)
            .filter(|task| task.is_due(now, binding.max_attempts)))
    }
}

impl std::fmt::Debug for RedisTaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTaskStore")
            .field("keys", &self.keys)
            .field("binding", &self.binding.get())
            .finish()
    }
}

#[async_trait]
impl TaskStore for RedisTaskStore {
    fn name(&self) -> &str {
        "redis"
    }

    fn bind(&self, binding: QueueBinding) {
        let _ = self.binding.set(binding);
    }

    async fn health_check(&self) -> HealthReport {
        if self.binding.get().is_none() {
            return HealthReport::not_bound();
        }
        let mut conn = self.conn.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(pong) if pong == "PONG" => HealthReport::ok(),
            Ok(other) => HealthReport::unavailable(format!("unexpected PING reply: {other}")),
            Err(e) => HealthReport::error(e.to_string()),
        }
    }

    async fn due_tasks(&self, now: DateTime<Utc>) -> Result<DueTasks<'_>, StoreError> {
        let binding = self.binding()?;
        let keys = self.scan_sendat_keys().await?;
        let stream = futures::stream::iter(keys)
            .then(move |key| async move { self.load_due(&key, now, binding).await })
            .filter_map(|loaded| async move { loaded.transpose() });
        Ok(stream.boxed())
    }

    async fn find_pending_for_recipient(
        &self,
        recipient: &Recipient,
        before: DateTime<Utc>,
    ) -> Result<Option<MailTask>, StoreError> {
        self.binding()?;
        let mut conn = self.conn.clone();
        let pointer: Option<String> = conn.get(self.keys.concat(recipient)).await?;
        let Some(id) = pointer.and_then(|p| p.parse::<TaskId>().ok()) else {
            return Ok(None);
        };

        Ok(self
            .load(&id)
            .await?
            .map(|(_, task)| task)
            .filter(|task| task.is_open() && task.scheduled_at <= before))
    }

    async fn insert(&self, task: &MailTask) -> Result<(), StoreError> {
        let binding = self.binding()?;
        let payload = serde_json::to_string(task)?;
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(self.keys.letter(&task.id), payload)
            .ignore()
            .set(self.keys.sendat(&task.id), sendat_marker(task))
            .ignore();
        if binding.concat_enabled {
            pipe.cmd("SET")
                .arg(self.keys.concat(&task.recipient))
                .arg(task.id.to_string())
                .arg("PXAT")
                .arg(pointer_expiry_ms(task))
                .ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn cancel(&self, id: &TaskId) -> Result<bool, StoreError> {
        let binding = self.binding()?;
        self.update_with(id, |mut task| {
            if !task.is_open() {
                None
            } else if binding.keep_history {
                task.cancelled = true;
                Some(Write::Replace(task))
            } else {
                Some(Write::Remove)
            }
        })
        .await
    }

    async fn delete(&self, task: &MailTask) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let (removed, _): (i64, i64) = redis::pipe()
            .atomic()
            .del(self.keys.letter(&task.id))
            .del(self.keys.sendat(&task.id))
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn mutate(&self, task: &MailTask, patch: &TaskPatch) -> Result<bool, StoreError> {
        self.update_with(&task.id, |mut stored| {
            if !patch.guard_holds(&stored) {
                return None;
            }
            patch.apply_to(&mut stored);
            Some(Write::Replace(stored))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MailFragment;
    use chrono::TimeZone;
    use ulid::Ulid;

    fn task(to: impl Into<Recipient>) -> MailTask {
        MailTask::new(
            TaskId::from_ulid(Ulid::new()),
            MailFragment::new(to).text("hi"),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn keys_are_namespaced_by_prefix() {
        let keys = RedisKeys::new("default");
        let t = task(vec!["b@x.com", "a@x.com"]);

        assert_eq!(keys.letter(&t.id), format!("mailtime:default:letter:{}", t.id));
        assert_eq!(keys.sendat(&t.id), format!("mailtime:default:sendat:{}", t.id));
        assert_eq!(
            keys.concat(&t.recipient),
            "mailtime:default:concatletter:a@x.com,b@x.com"
        );
        assert_eq!(keys.sendat_pattern(), "mailtime:default:sendat:*");
    }

    #[test]
    fn id_is_recovered_from_sendat_keys_of_the_same_prefix_only() {
        let keys = RedisKeys::new("a:b");
        let t = task("a@x.com");

        assert_eq!(keys.id_from_sendat(&keys.sendat(&t.id)), Some(t.id));
        assert_eq!(keys.id_from_sendat(&keys.letter(&t.id)), None);
        assert_eq!(
            RedisKeys::new("other").id_from_sendat(&keys.sendat(&t.id)),
            None
        );
        assert_eq!(keys.id_from_sendat("mailtime:a:b:sendat:not-a-ulid"), None);
    }

    #[test]
    fn only_open_tasks_keep_a_sendat_marker() {
        let mut t = task("a@x.com");
        assert_eq!(sendat_marker(&t), t.scheduled_at.timestamp_millis().to_string());

        t.sent = true;
        assert_eq!(sendat_marker(&t), "");
    }

    #[test]
    fn concat_pointer_expires_before_send_at() {
        let t = task("a@x.com");
        assert_eq!(pointer_expiry_ms(&t), t.scheduled_at.timestamp_millis() - 128);
    }
}
