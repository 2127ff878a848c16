//! Durable local cache of chat messages.
//!
//! [`MessageStore`] is the async handle the UI layer and the transport share.
//! Open one per process, either directly or through [`init`] / [`global`].

pub mod config;
pub mod store;

pub use chatvault_db::{StoreError, migrations::SCHEMA_VERSION};
pub use chatvault_types::models::timestamp;
pub use chatvault_types::{ConversationSummary, MessageRecord, Payload, RecordPatch, SyncEvent};
pub use config::StoreConfig;
pub use store::MessageStore;

use tokio::sync::OnceCell;

static STORE: OnceCell<MessageStore> = OnceCell::const_new();

/// Opens the process-wide store. Only the first call opens and migrates the
/// file; concurrent and later callers get the same handle and their config is
/// ignored.
pub async fn init(config: &StoreConfig) -> Result<&'static MessageStore, StoreError> {
    STORE
        .get_or_try_init(|| MessageStore::open(config))
        .await
}

/// The process-wide store, if [`init`] has completed.
pub fn global() -> Option<&'static MessageStore> {
    STORE.get()
}
