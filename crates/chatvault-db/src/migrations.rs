use rusqlite::{Connection, TransactionBehavior};
use tracing::info;

use crate::error::{Result, StoreError};

/// Highest schema version this build knows how to use.
pub const SCHEMA_VERSION: i64 = 1;

/// Brings the schema up to [`SCHEMA_VERSION`] and returns the resulting version.
///
/// Runs inside an immediate transaction, so two processes opening the same
/// file for the first time cannot both apply a migration.
pub fn run(conn: &mut Connection, location: &str) -> Result<i64> {
    let unavailable = |source| StoreError::StorageUnavailable {
        location: location.to_string(),
        source,
    };

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(unavailable)?;

    tx.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")
        .map_err(unavailable)?;

    let version: i64 = tx
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |r| r.get(0),
        )
        .map_err(unavailable)?;

    if version > SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchema {
            found: version,
            supported: SCHEMA_VERSION,
        });
    }

    if version < 1 {
        info!("Message store: running migration v1 (initial schema)");
        tx.execute_batch(
            "
            CREATE TABLE messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                timestamp       TEXT NOT NULL,
                payload         TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id);

            CREATE INDEX idx_messages_timestamp
                ON messages(timestamp);

            CREATE INDEX idx_messages_conversation_time
                ON messages(conversation_id, timestamp, id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )
        .map_err(unavailable)?;
    }

    tx.commit().map_err(unavailable)?;
    Ok(version.max(SCHEMA_VERSION))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_twice_is_a_no_op() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(run(&mut conn, ":memory:").unwrap(), 1);
        assert_eq!(run(&mut conn, ":memory:").unwrap(), 1);

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn creates_lookup_indexes() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn, ":memory:").unwrap();

        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'messages' ORDER BY name")
            .unwrap();
        let names: Vec<String> = stmt
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(
            names,
            vec![
                "idx_messages_conversation",
                "idx_messages_conversation_time",
                "idx_messages_timestamp",
            ]
        );
    }

    #[test]
    fn newer_schema_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn, ":memory:").unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (2)", [])
            .unwrap();

        let err = run(&mut conn, ":memory:").unwrap_err();
        assert!(matches!(
            err,
            StoreError::UnsupportedSchema {
                found: 2,
                supported: 1
            }
        ));
        assert!(err.is_unavailable());
    }
}
