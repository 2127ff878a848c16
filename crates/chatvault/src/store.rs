use std::sync::Arc;

use chatvault_db::{Database, StoreError};
use chatvault_types::{ConversationSummary, MessageRecord, Payload, RecordPatch, SyncEvent};
use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::config::StoreConfig;

/// Async handle to the message cache. Cheap to clone; clones share one database.
///
/// Every method runs its SQLite work on the blocking pool and yields until the
/// transaction resolves. Dropping a future does not abort a transaction that
/// has already started.
#[derive(Clone)]
pub struct MessageStore {
    db: Arc<Database>,
}

impl MessageStore {
    /// Opens (creating if needed) and migrates the store at `config.path`.
    pub async fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let path = config.path.clone();
        let options = config.db_options();
        let db = spawn_db(move || Database::open_with(&path, &options)).await?;
        Ok(Self::from_database(db))
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let db = spawn_db(Database::open_in_memory).await?;
        Ok(Self::from_database(db))
    }

    pub fn from_database(db: Database) -> Self {
        Self { db: Arc::new(db) }
    }

    pub fn schema_version(&self) -> i64 {
        self.db.schema_version()
    }

    pub async fn save(
        &self,
        conversation_id: impl Into<String>,
        payload: Payload,
    ) -> Result<MessageRecord, StoreError> {
        let conversation_id = conversation_id.into();
        self.run(move |db| db.save(&conversation_id, payload)).await
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<MessageRecord>, StoreError> {
        self.run(move |db| db.get_by_id(id)).await
    }

    pub async fn get_by_conversation(
        &self,
        conversation_id: impl Into<String>,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let conversation_id = conversation_id.into();
        self.run(move |db| db.get_by_conversation(&conversation_id))
            .await
    }

    /// Inclusive time range, oldest first. With `limit`, keeps the messages
    /// nearest `end`.
    pub async fn get_by_conversation_and_time_range(
        &self,
        conversation_id: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: Option<u32>,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let conversation_id = conversation_id.into();
        self.run(move |db| {
            db.get_by_conversation_and_time_range(&conversation_id, start, end, limit)
        })
        .await
    }

    /// The `n` most recent messages, oldest first.
    pub async fn latest(
        &self,
        conversation_id: impl Into<String>,
        n: u32,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let conversation_id = conversation_id.into();
        self.run(move |db| db.latest(&conversation_id, n)).await
    }

    pub async fn count_by_conversation(
        &self,
        conversation_id: impl Into<String>,
    ) -> Result<u64, StoreError> {
        let conversation_id = conversation_id.into();
        self.run(move |db| db.count_by_conversation(&conversation_id))
            .await
    }

    pub async fn conversations(&self) -> Result<Vec<ConversationSummary>, StoreError> {
        self.run(|db| db.conversations()).await
    }

    /// Merges `patch` into a cached message. Unknown ids are ignored.
    pub async fn update(&self, id: i64, patch: RecordPatch) -> Result<(), StoreError> {
        self.run(move |db| db.update(id, &patch)).await
    }

    pub async fn delete_by_id(&self, id: i64) -> Result<(), StoreError> {
        self.run(move |db| db.delete_by_id(id)).await
    }

    pub async fn delete_by_conversation(
        &self,
        conversation_id: impl Into<String>,
    ) -> Result<(), StoreError> {
        let conversation_id = conversation_id.into();
        self.run(move |db| db.delete_by_conversation(&conversation_id))
            .await
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.run(|db| db.clear()).await
    }

    /// Applies a change pushed by the transport. Returns the stored record for
    /// `MessageReceived`, `None` for everything else.
    pub async fn apply(&self, event: SyncEvent) -> Result<Option<MessageRecord>, StoreError> {
        debug!("Applying sync event {:?}", event);
        match event {
            SyncEvent::MessageReceived {
                conversation_id,
                payload,
            } => self.save(conversation_id, payload).await.map(Some),
            SyncEvent::MessageUpdated { id, patch } => self.update(id, patch).await.map(|_| None),
            SyncEvent::MessageDeleted { id } => self.delete_by_id(id).await.map(|_| None),
            SyncEvent::ConversationCleared { conversation_id } => self
                .delete_by_conversation(conversation_id)
                .await
                .map(|_| None),
            SyncEvent::Reset => self.clear().await.map(|_| None),
        }
    }

    async fn run<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        spawn_db(move || f(&db)).await
    }
}

/// Runs blocking SQLite work off the async runtime.
async fn spawn_db<F, T>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StoreError::TaskFailed(e.to_string())
    })?
}
