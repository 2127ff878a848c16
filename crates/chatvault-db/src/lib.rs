pub mod error;
pub mod migrations;
pub mod models;
pub mod queries;

pub use error::{Result, StoreError};

use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::info;

const MEMORY_LOCATION: &str = ":memory:";

/// Connection settings applied when opening a file-backed store.
#[derive(Debug, Clone)]
pub struct DbOptions {
    /// Read-only connections opened beside the writer. Zero routes reads through the writer.
    pub readers: usize,
    pub busy_timeout: Duration,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            readers: 4,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Message cache database with a reader/writer split.
///
/// All mutations go through the single writer connection inside a SQLite
/// transaction. Reads are spread round-robin over the read-only pool.
pub struct Database {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    reader_idx: AtomicUsize,
    location: String,
    schema_version: i64,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, &DbOptions::default())
    }

    pub fn open_with(path: &Path, options: &DbOptions) -> Result<Self> {
        // Every connection to ":memory:" is its own database; a reader pool
        // would never see the writer's tables.
        if path == Path::new(MEMORY_LOCATION) {
            return Self::open_in_memory();
        }

        let location = path.display().to_string();
        let unavailable = |source| StoreError::StorageUnavailable {
            location: location.clone(),
            source,
        };

        let mut writer = Connection::open(path).map_err(unavailable)?;
        writer.busy_timeout(options.busy_timeout).map_err(unavailable)?;
        writer
            .pragma_update(None, "journal_mode", "WAL")
            .map_err(unavailable)?;

        let schema_version = migrations::run(&mut writer, &location)?;

        let mut readers = Vec::with_capacity(options.readers);
        for _ in 0..options.readers {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(unavailable)?;
            conn.busy_timeout(options.busy_timeout).map_err(unavailable)?;
            readers.push(Mutex::new(conn));
        }

        info!(
            "Message store opened at {} (1 writer + {} readers, schema v{})",
            location,
            readers.len(),
            schema_version
        );
        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            reader_idx: AtomicUsize::new(0),
            location,
            schema_version,
        })
    }

    /// Ephemeral store for tests and throwaway sessions. Reads share the writer.
    pub fn open_in_memory() -> Result<Self> {
        let mut writer =
            Connection::open_in_memory().map_err(|source| StoreError::StorageUnavailable {
                location: MEMORY_LOCATION.to_string(),
                source,
            })?;
        let schema_version = migrations::run(&mut writer, MEMORY_LOCATION)?;

        Ok(Self {
            writer: Mutex::new(writer),
            readers: Vec::new(),
            reader_idx: AtomicUsize::new(0),
            location: MEMORY_LOCATION.to_string(),
            schema_version,
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn schema_version(&self) -> i64 {
        self.schema_version
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        if self.readers.is_empty() {
            return self.with_conn_mut(|conn| f(conn));
        }
        let idx = self.reader_idx.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[idx]
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.writer.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&mut conn)
    }
}
