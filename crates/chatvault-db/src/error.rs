use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message store unavailable at {location}: {source}")]
    StorageUnavailable {
        location: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: i64, supported: i64 },

    #[error("write failed: {0}")]
    WriteFailed(#[source] rusqlite::Error),

    #[error("read failed: {0}")]
    ReadFailed(#[source] rusqlite::Error),

    #[error("stored message {id} is corrupt: {reason}")]
    CorruptRecord { id: i64, reason: String },

    #[error("payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("connection lock poisoned")]
    LockPoisoned,

    #[error("storage task failed: {0}")]
    TaskFailed(String),
}

impl StoreError {
    /// The backing file could not be opened or migrated. Fatal for the store.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable { .. } | Self::UnsupportedSchema { .. }
        )
    }

    /// A transaction aborted; the caller may re-attempt the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WriteFailed(_) | Self::ReadFailed(_))
    }
}

/// Tags raw SQLite failures with the side of the store they happened on.
pub(crate) trait SqlResultExt<T> {
    fn on_write(self) -> Result<T>;
    fn on_read(self) -> Result<T>;
}

impl<T> SqlResultExt<T> for std::result::Result<T, rusqlite::Error> {
    fn on_write(self) -> Result<T> {
        self.map_err(StoreError::WriteFailed)
    }

    fn on_read(self) -> Result<T> {
        self.map_err(StoreError::ReadFailed)
    }
}
