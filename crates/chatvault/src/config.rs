use std::path::PathBuf;
use std::time::Duration;

use chatvault_db::DbOptions;
use tracing::warn;

const DEFAULT_DB_PATH: &str = "chatvault.db";

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub readers: usize,
    pub busy_timeout: Duration,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let defaults = DbOptions::default();
        Self {
            path: path.into(),
            readers: defaults.readers,
            busy_timeout: defaults.busy_timeout,
        }
    }

    /// Reads `CHATVAULT_DB_PATH`, `CHATVAULT_READERS` and
    /// `CHATVAULT_BUSY_TIMEOUT_MS`. Unparseable numbers keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config =
            Self::new(lookup("CHATVAULT_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.into()));

        if let Some(raw) = lookup("CHATVAULT_READERS") {
            match raw.parse() {
                Ok(readers) => config.readers = readers,
                Err(e) => warn!("Ignoring CHATVAULT_READERS={}: {}", raw, e),
            }
        }
        if let Some(raw) = lookup("CHATVAULT_BUSY_TIMEOUT_MS") {
            match raw.parse() {
                Ok(ms) => config.busy_timeout = Duration::from_millis(ms),
                Err(e) => warn!("Ignoring CHATVAULT_BUSY_TIMEOUT_MS={}: {}", raw, e),
            }
        }

        config
    }

    pub(crate) fn db_options(&self) -> DbOptions {
        DbOptions {
            readers: self.readers,
            busy_timeout: self.busy_timeout,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DB_PATH)
    }
}
