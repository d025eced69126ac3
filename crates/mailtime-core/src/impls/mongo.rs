//! MongoDB task store (feature `mongo`).
//!
//! prefix ごとに 1 collection（`__mailTimeQueue__<prefix>`）、task ごとに 1 document。
//! grouping 用に `recipientKey`（`Recipient::grouping_key`）を追加で保存します。
//!
//! # 原子性
//! - claim / cancel は filter 付きの `update_one` / `delete_one` 1 回
//! - index 作成の衝突（code 85 / 86）は同じキーの index を drop して作り直す

use std::collections::BTreeSet;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use mongodb::bson::{Document, doc};
use mongodb::error::ErrorKind;
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, Database, IndexModel};
use tracing::{debug, error, warn};

use crate::domain::{MailTask, Recipient, TaskId};
use crate::ports::{
    DueTasks, HealthReport, PatchGuard, QueueBinding, StoreError, TaskPatch, TaskStore,
};

const RECIPIENT_KEY: &str = "recipientKey";

pub struct MongoTaskStore {
    db: Database,
    collection: Collection<Document>,
    tasks: Collection<MailTask>,
    binding: OnceLock<QueueBinding>,
}

impl MongoTaskStore {
    /// Does not touch indexes; see [`MongoTaskStore::ensure_indexes`].
    pub fn new(db: &Database, prefix: &str) -> Self {
        let collection = db.collection::<Document>(&collection_name(prefix));
        Self {
            db: db.clone(),
            tasks: collection.clone_with_type(),
            collection,
            binding: OnceLock::new(),
        }
    }

    /// Connect, pick the database and make sure the indexes exist.
    pub async fn connect(uri: &str, database: &str, prefix: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri).await?;
        let store = Self::new(&client.database(database), prefix);
        store.ensure_indexes().await;
        debug!(database, prefix, "connected to mongodb");
        Ok(store)
    }

    /// Failures are logged, never raised.
    pub async fn ensure_indexes(&self) {
        for model in index_models() {
            self.ensure_index(model).await;
        }
    }

    async fn ensure_index(&self, model: IndexModel) {
        let keys = model.keys.clone();
        match self.collection.create_index(model.clone()).await {
            Ok(_) => {}
            Err(e) if is_index_conflict(&e) => {
                warn!(keys = %keys, error = %e, "index conflict; dropping and recreating");
                if let Err(e) = self.recreate_index(model).await {
                    error!(keys = %keys, error = %e, "could not recreate index");
                }
            }
            Err(e) => error!(keys = %keys, error = %e, "could not create index"),
        }
    }

    async fn recreate_index(&self, model: IndexModel) -> Result<(), StoreError> {
        let wanted = key_names(&model.keys);
        let mut existing = self.collection.list_indexes().await?;
        while let Some(index) = existing.try_next().await? {
            if key_names(&index.keys) != wanted {
                continue;
            }
            if let Some(name) = index.options.and_then(|o| o.name) {
                self.collection.drop_index(name).await?;
            }
        }
        self.collection.create_index(model).await?;
        Ok(())
    }

    fn binding(&self) -> Result<QueueBinding, StoreError> {
        self.binding.get().copied().ok_or(StoreError::NotBound)
    }
}

impl std::fmt::Debug for MongoTaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoTaskStore")
            .field("collection", &self.collection.name())
            .field("binding", &self.binding.get())
            .finish()
    }
}

fn collection_name(prefix: &str) -> String {
    format!("__mailTimeQueue__{prefix}")
}

fn index_models() -> Vec<IndexModel> {
    vec![
        IndexModel::builder()
            .keys(doc! { "uuid": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build(),
        IndexModel::builder()
            .keys(doc! { "isSent": 1, "isFailed": 1, "isCancelled": 1, "recipientKey": 1, "sendAt": 1 })
            .build(),
        IndexModel::builder()
            .keys(doc! { "isSent": 1, "isFailed": 1, "isCancelled": 1, "sendAt": 1, "tries": 1 })
            .build(),
    ]
}

fn key_names(keys: &Document) -> BTreeSet<&str> {
    keys.keys().map(String::as_str).collect()
}

/// IndexOptionsConflict (85) / IndexKeySpecsConflict (86).
fn is_index_conflict(err: &mongodb::error::Error) -> bool {
    matches!(err.kind.as_ref(), ErrorKind::Command(c) if c.code == 85 || c.code == 86)
}

fn open_filter() -> Document {
    doc! { "isSent": false, "isCancelled": false, "isFailed": false }
}

fn id_filter(id: &TaskId) -> Document {
    doc! { "uuid": id.to_string() }
}

fn due_filter(now: DateTime<Utc>, max_attempts: u32) -> Document {
    let mut filter = open_filter();
    filter.insert("sendAt", doc! { "$lte": now.timestamp_millis() });
    filter.insert("tries", doc! { "$lt": i64::from(max_attempts) });
    filter
}

fn pending_filter(recipient: &Recipient, before: DateTime<Utc>) -> Document {
    let mut filter = open_filter();
    filter.insert(RECIPIENT_KEY, recipient.grouping_key());
    filter.insert("sendAt", doc! { "$lte": before.timestamp_millis() });
    filter
}

fn cancel_filter(id: &TaskId) -> Document {
    with_open(id_filter(id))
}

fn with_open(mut filter: Document) -> Document {
    for (key, value) in open_filter() {
        filter.insert(key, value);
    }
    filter
}

fn mutate_filter(id: &TaskId, patch: &TaskPatch) -> Document {
    let mut filter = id_filter(id);
    match patch.guard {
        None => {}
        Some(PatchGuard::Unclaimed { attempts }) => {
            filter = with_open(filter);
            filter.insert("tries", i64::from(attempts));
        }
        Some(PatchGuard::Appendable {
            attempts,
            fragments,
        }) => {
            filter = with_open(filter);
            filter.insert("tries", i64::from(attempts));
            filter.insert("mailOptions", doc! { "$size": fragments as i64 });
        }
    }
    filter
}

fn task_document(task: &MailTask) -> Result<Document, StoreError> {
    let mut document = mongodb::bson::to_document(task)?;
    document.insert(RECIPIENT_KEY, task.recipient.grouping_key());
    Ok(document)
}

fn update_document(patch: &TaskPatch) -> Result<Document, StoreError> {
    Ok(doc! { "$set": mongodb::bson::to_document(patch)? })
}

#[async_trait]
impl TaskStore for MongoTaskStore {
    fn name(&self) -> &str {
        "mongo"
    }

    fn bind(&self, binding: QueueBinding) {
        let _ = self.binding.set(binding);
    }

    async fn health_check(&self) -> HealthReport {
        if self.binding.get().is_none() {
            return HealthReport::not_bound();
        }
        match self.db.run_command(doc! { "ping": 1 }).await {
            Ok(_) => HealthReport::ok(),
            Err(e) => HealthReport::error(e.to_string()),
        }
    }

    async fn due_tasks(&self, now: DateTime<Utc>) -> Result<DueTasks<'_>, StoreError> {
        let binding = self.binding()?;
        let cursor = self.tasks.find(due_filter(now, binding.max_attempts)).await?;
        Ok(cursor.map(|item| item.map_err(StoreError::from)).boxed())
    }

    async fn find_pending_for_recipient(
        &self,
        recipient: &Recipient,
        before: DateTime<Utc>,
    ) -> Result<Option<MailTask>, StoreError> {
        self.binding()?;
        Ok(self
            .tasks
            .find_one(pending_filter(recipient, before))
            .sort(doc! { "sendAt": -1 })
            .await?)
    }

    async fn insert(&self, task: &MailTask) -> Result<(), StoreError> {
        self.binding()?;
        self.collection.insert_one(task_document(task)?).await?;
        Ok(())
    }

    async fn cancel(&self, id: &TaskId) -> Result<bool, StoreError> {
        let binding = self.binding()?;
        if binding.keep_history {
            let result = self
                .collection
                .update_one(cancel_filter(id), doc! { "$set": { "isCancelled": true } })
                .await?;
            Ok(result.matched_count > 0)
        } else {
            let result = self.collection.delete_one(cancel_filter(id)).await?;
            Ok(result.deleted_count > 0)
        }
    }

    async fn delete(&self, task: &MailTask) -> Result<bool, StoreError> {
        let result = self.collection.delete_one(id_filter(&task.id)).await?;
        Ok(result.deleted_count > 0)
    }

    async fn mutate(&self, task: &MailTask, patch: &TaskPatch) -> Result<bool, StoreError> {
        let filter = mutate_filter(&task.id, patch);
        if patch.is_empty() {
            return Ok(self.collection.count_documents(filter).await? > 0);
        }
        let result = self
            .collection
            .update_one(filter, update_document(patch)?)
            .await?;
        Ok(result.matched_count > 0)
    }
}
