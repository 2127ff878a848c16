use chatvault_types::models::{strip_reserved, timestamp};
use chatvault_types::{ConversationSummary, MessageRecord, Payload, RecordPatch};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Params, Transaction, TransactionBehavior, params};
use tracing::debug;

use crate::Database;
use crate::error::{Result, SqlResultExt, StoreError};
use crate::models::{ConversationRow, MESSAGE_COLUMNS, MessageRow};

impl Database {
    // -- Writes --

    /// Stores a new message. The store assigns `id` and `timestamp`.
    pub fn save(&self, conversation_id: &str, mut payload: Payload) -> Result<MessageRecord> {
        let dropped = strip_reserved(&mut payload);
        if !dropped.is_empty() {
            debug!(
                "Dropped reserved payload keys {:?} for conversation {}",
                dropped, conversation_id
            );
        }
        let encoded = serde_json::to_string(&payload)?;

        self.write(|tx| {
            // Stamped under the writer lock so timestamps follow id order.
            let now = timestamp::now();
            tx.execute(
                "INSERT INTO messages (conversation_id, timestamp, payload) VALUES (?1, ?2, ?3)",
                params![conversation_id, timestamp::format(&now), encoded],
            )
            .on_write()?;

            let record = MessageRecord {
                id: tx.last_insert_rowid(),
                conversation_id: conversation_id.to_string(),
                timestamp: now,
                payload,
            };
            debug!("Saved message {} in {}", record.id, conversation_id);
            Ok(record)
        })
    }

    /// Merges `patch` into the message with `id`. Missing ids are a no-op.
    pub fn update(&self, id: i64, patch: &RecordPatch) -> Result<()> {
        self.write(|tx| {
            let row = tx
                .query_row(
                    &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                    [id],
                    MessageRow::from_row,
                )
                .optional()
                .on_write()?;

            let Some(row) = row else {
                debug!("Update skipped, message {} is not cached", id);
                return Ok(());
            };

            let mut record = row.into_record()?;
            patch.apply_to(&mut record);
            let encoded = serde_json::to_string(&record.payload)?;

            tx.execute(
                "UPDATE messages SET timestamp = ?1, payload = ?2 WHERE id = ?3",
                params![timestamp::format(&record.timestamp), encoded, id],
            )
            .on_write()?;
            Ok(())
        })
    }

    pub fn delete_by_id(&self, id: i64) -> Result<()> {
        self.write(|tx| {
            let removed = tx
                .execute("DELETE FROM messages WHERE id = ?1", [id])
                .on_write()?;
            debug!("Deleted message {} ({} row)", id, removed);
            Ok(())
        })
    }

    pub fn delete_by_conversation(&self, conversation_id: &str) -> Result<()> {
        self.write(|tx| {
            let removed = tx
                .execute(
                    "DELETE FROM messages WHERE conversation_id = ?1",
                    [conversation_id],
                )
                .on_write()?;
            debug!("Deleted {} messages from {}", removed, conversation_id);
            Ok(())
        })
    }

    /// Removes every message. The id sequence is kept, so ids are never reused.
    pub fn clear(&self) -> Result<()> {
        self.write(|tx| {
            let removed = tx.execute("DELETE FROM messages", []).on_write()?;
            debug!("Cleared message store ({} messages)", removed);
            Ok(())
        })
    }

    // -- Reads --

    pub fn get_by_id(&self, id: i64) -> Result<Option<MessageRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                [id],
                MessageRow::from_row,
            )
            .optional()
            .on_read()?
            .map(MessageRow::into_record)
            .transpose()
        })
    }

    /// All messages of a conversation. Callers must not rely on the order.
    pub fn get_by_conversation(&self, conversation_id: &str) -> Result<Vec<MessageRecord>> {
        self.with_conn(|conn| {
            query_records(
                conn,
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1 ORDER BY id"
                ),
                [conversation_id],
            )
        })
    }

    /// Messages of a conversation with `start <= timestamp <= end`, oldest first.
    ///
    /// With a `limit`, the messages nearest `end` are kept: the range is scanned
    /// newest first, capped, then returned in ascending order.
    pub fn get_by_conversation_and_time_range(
        &self,
        conversation_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: Option<u32>,
    ) -> Result<Vec<MessageRecord>> {
        // Stored timestamps are whole milliseconds, so a finer start rounds up.
        let start = timestamp::ceil(start);
        if start > end || limit == Some(0) {
            return Ok(Vec::new());
        }
        let start = timestamp::format(&start);
        let end = timestamp::format(&end);

        self.with_conn(|conn| match limit {
            None => query_records(
                conn,
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE conversation_id = ?1 AND timestamp BETWEEN ?2 AND ?3
                     ORDER BY timestamp ASC, id ASC"
                ),
                params![conversation_id, start, end],
            ),
            Some(limit) => {
                let mut records = query_records(
                    conn,
                    &format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages
                         WHERE conversation_id = ?1 AND timestamp BETWEEN ?2 AND ?3
                         ORDER BY timestamp DESC, id DESC
                         LIMIT ?4"
                    ),
                    params![conversation_id, start, end, limit],
                )?;
                records.reverse();
                Ok(records)
            }
        })
    }

    /// The `n` most recent messages of a conversation, oldest first.
    pub fn latest(&self, conversation_id: &str, n: u32) -> Result<Vec<MessageRecord>> {
        self.get_by_conversation_and_time_range(
            conversation_id,
            timestamp::earliest(),
            timestamp::latest(),
            Some(n),
        )
    }

    pub fn count_by_conversation(&self, conversation_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                    [conversation_id],
                    |r| r.get(0),
                )
                .on_read()?;
            Ok(count as u64)
        })
    }

    /// Cached conversations, most recently active first.
    pub fn conversations(&self) -> Result<Vec<ConversationSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT conversation_id, COUNT(*), MAX(timestamp), MAX(id)
                     FROM messages
                     GROUP BY conversation_id
                     ORDER BY MAX(timestamp) DESC, conversation_id ASC",
                )
                .on_read()?;

            let rows = stmt
                .query_map([], |row| {
                    Ok(ConversationRow {
                        conversation_id: row.get(0)?,
                        message_count: row.get(1)?,
                        latest_timestamp: row.get(2)?,
                        latest_id: row.get(3)?,
                    })
                })
                .on_read()?
                .collect::<std::result::Result<Vec<_>, _>>()
                .on_read()?;

            rows.into_iter()
                .map(|row| {
                    let latest_timestamp =
                        timestamp::parse(&row.latest_timestamp).map_err(|e| {
                            StoreError::CorruptRecord {
                                id: row.latest_id,
                                reason: format!(
                                    "bad timestamp '{}': {}",
                                    row.latest_timestamp, e
                                ),
                            }
                        })?;
                    Ok(ConversationSummary {
                        conversation_id: row.conversation_id,
                        message_count: row.message_count as u64,
                        latest_timestamp,
                    })
                })
                .collect()
        })
    }

    /// Runs `f` inside an immediate transaction on the writer connection.
    /// Dropping the transaction on error rolls it back.
    fn write<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        self.with_conn_mut(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .on_write()?;
            let out = f(&tx)?;
            tx.commit().on_write()?;
            Ok(out)
        })
    }
}

fn query_records<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<MessageRecord>> {
    let mut stmt = conn.prepare(sql).on_read()?;
    let rows = stmt
        .query_map(params, MessageRow::from_row)
        .on_read()?
        .collect::<std::result::Result<Vec<_>, _>>()
        .on_read()?;

    rows.into_iter().map(MessageRow::into_record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn text(t: &str) -> Payload {
        let mut p = Payload::new();
        p.insert("text".into(), json!(t));
        p
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 12, minute, 0).unwrap()
    }

    /// Saves one message per minute value and pins its timestamp.
    fn seed(db: &Database, conversation_id: &str, minutes: &[u32]) -> Vec<MessageRecord> {
        minutes
            .iter()
            .map(|&m| {
                let rec = db.save(conversation_id, text(&format!("m{m}"))).unwrap();
                db.update(rec.id, &RecordPatch::new().with_timestamp(at(m)))
                    .unwrap();
                db.get_by_id(rec.id).unwrap().unwrap()
            })
            .collect()
    }

    fn texts(records: &[MessageRecord]) -> Vec<&str> {
        records
            .iter()
            .map(|r| r.field("text").and_then(|v| v.as_str()).unwrap_or(""))
            .collect()
    }

    #[test]
    fn save_assigns_increasing_ids() {
        let db = db();
        let ids: Vec<i64> = (0..5)
            .map(|i| db.save(if i % 2 == 0 { "a" } else { "b" }, text("x")).unwrap().id)
            .collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn save_stamps_the_current_instant() {
        let db = db();
        let before = timestamp::truncate(Utc::now());
        let saved = db.save("room1", text("now")).unwrap();
        let after = Utc::now();

        assert!(before <= saved.timestamp, "{} < {}", saved.timestamp, before);
        assert!(saved.timestamp <= after, "{} > {}", saved.timestamp, after);
    }

    #[test]
    fn get_by_id_returns_saved_record() {
        let db = db();
        let mut payload = text("hello");
        payload.insert("sender".into(), json!("alice"));
        let saved = db.save("room1", payload).unwrap();

        let fetched = db.get_by_id(saved.id).unwrap().unwrap();
        assert_eq!(fetched, saved);
        assert_eq!(fetched.field("sender"), Some(&json!("alice")));
        assert_eq!(db.get_by_id(saved.id + 100).unwrap(), None);
    }

    #[test]
    fn reserved_payload_keys_cannot_override_identity() {
        let db = db();
        let mut payload = text("hi");
        payload.insert("id".into(), json!(999));
        payload.insert("conversationId".into(), json!("other"));
        payload.insert("timestamp".into(), json!("1999-01-01T00:00:00.000Z"));

        let saved = db.save("room1", payload).unwrap();
        assert_ne!(saved.id, 999);
        assert_eq!(saved.conversation_id, "room1");
        assert_eq!(saved.payload.len(), 1);
        assert_eq!(db.get_by_id(saved.id).unwrap().unwrap(), saved);
    }

    #[test]
    fn delete_by_id_is_idempotent() {
        let db = db();
        let saved = db.save("room1", text("a")).unwrap();

        db.delete_by_id(saved.id).unwrap();
        assert_eq!(db.get_by_id(saved.id).unwrap(), None);
        db.delete_by_id(saved.id).unwrap();
    }

    #[test]
    fn update_merges_fields() {
        let db = db();
        let mut payload = text("a");
        payload.insert("status".into(), json!("sent"));
        let saved = db.save("room1", payload).unwrap();

        db.update(saved.id, &RecordPatch::new().set("status", "read"))
            .unwrap();

        let fetched = db.get_by_id(saved.id).unwrap().unwrap();
        assert_eq!(fetched.id, saved.id);
        assert_eq!(fetched.timestamp, saved.timestamp);
        assert_eq!(fetched.field("status"), Some(&json!("read")));
        assert_eq!(fetched.field("text"), Some(&json!("a")));
    }

    #[test]
    fn update_of_missing_id_creates_nothing() {
        let db = db();
        db.update(42, &RecordPatch::new().set("status", "read"))
            .unwrap();
        assert_eq!(db.get_by_id(42).unwrap(), None);
        assert!(db.conversations().unwrap().is_empty());
    }

    #[test]
    fn delete_by_conversation_leaves_others() {
        let db = db();
        db.save("room1", text("a")).unwrap();
        db.save("room1", text("b")).unwrap();
        let kept = db.save("room2", text("c")).unwrap();

        db.delete_by_conversation("room1").unwrap();
        assert!(db.get_by_conversation("room1").unwrap().is_empty());
        assert_eq!(db.get_by_conversation("room2").unwrap(), vec![kept]);
    }

    #[test]
    fn deleting_the_middle_message_keeps_the_rest() {
        let db = db();
        let saved: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|t| db.save("room1", text(t)).unwrap())
            .collect();
        assert_eq!(db.get_by_conversation("room1").unwrap().len(), 3);

        db.delete_by_id(saved[1].id).unwrap();
        let remaining = db.get_by_conversation("room1").unwrap();
        assert_eq!(texts(&remaining), vec!["a", "c"]);
    }

    #[test]
    fn clear_empties_every_conversation() {
        let db = db();
        for c in ["room1", "room2", "room3"] {
            db.save(c, text("x")).unwrap();
        }
        db.clear().unwrap();

        for c in ["room1", "room2", "room3"] {
            assert!(db.get_by_conversation(c).unwrap().is_empty());
        }
        assert!(db.conversations().unwrap().is_empty());
    }

    #[test]
    fn range_is_inclusive_and_ascending() {
        let db = db();
        seed(&db, "room1", &[5, 1, 3, 4, 2]);
        seed(&db, "room2", &[3]);

        let records = db
            .get_by_conversation_and_time_range("room1", at(2), at(4), None)
            .unwrap();
        assert_eq!(texts(&records), vec!["m2", "m3", "m4"]);
        assert!(records.iter().all(|r| r.conversation_id == "room1"));
    }

    #[test]
    fn range_start_with_sub_millisecond_fraction_excludes_earlier_records() {
        let db = db();
        seed(&db, "room1", &[1, 2]);

        let start = at(1) + chrono::TimeDelta::microseconds(500);
        let records = db
            .get_by_conversation_and_time_range("room1", start, at(2), None)
            .unwrap();
        assert_eq!(texts(&records), vec!["m2"]);
        assert!(records.iter().all(|r| r.timestamp >= start));

        // Nothing stored fits between two instants inside the same millisecond.
        let end = at(1) + chrono::TimeDelta::microseconds(900);
        assert!(
            db.get_by_conversation_and_time_range("room1", start, end, None)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn range_ties_break_by_id() {
        let db = db();
        let seeded = seed(&db, "room1", &[7, 7, 7]);

        let records = db
            .get_by_conversation_and_time_range("room1", at(0), at(59), None)
            .unwrap();
        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, seeded.iter().map(|r| r.id).collect::<Vec<_>>());
    }

    #[test]
    fn limited_range_keeps_the_newest() {
        let db = db();
        seed(&db, "room1", &[1, 2, 3, 4, 5]);

        let records = db
            .get_by_conversation_and_time_range("room1", at(0), at(4), Some(2))
            .unwrap();
        assert_eq!(texts(&records), vec!["m3", "m4"]);

        let latest = db.latest("room1", 3).unwrap();
        assert_eq!(texts(&latest), vec!["m3", "m4", "m5"]);
        assert!(db.latest("room1", 0).unwrap().is_empty());
        assert_eq!(db.latest("room1", 50).unwrap().len(), 5);
    }

    #[test]
    fn inverted_range_is_empty() {
        let db = db();
        seed(&db, "room1", &[1, 2]);
        assert!(
            db.get_by_conversation_and_time_range("room1", at(2), at(1), None)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn conversations_are_summarized_newest_first() {
        let db = db();
        seed(&db, "old", &[1, 2]);
        seed(&db, "new", &[9]);

        let summaries = db.conversations().unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].conversation_id, "new");
        assert_eq!(summaries[0].message_count, 1);
        assert_eq!(summaries[1].conversation_id, "old");
        assert_eq!(summaries[1].message_count, 2);
        assert_eq!(summaries[1].latest_timestamp, at(2));
        assert_eq!(db.count_by_conversation("old").unwrap(), 2);
        assert_eq!(db.count_by_conversation("missing").unwrap(), 0);
    }

    #[test]
    fn corrupt_payload_is_reported() {
        let db = db();
        let saved = db.save("room1", text("a")).unwrap();
        db.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE messages SET payload = '[1,2]' WHERE id = ?1",
                [saved.id],
            )
            .on_write()?;
            Ok(())
        })
        .unwrap();

        let err = db.get_by_id(saved.id).unwrap_err();
        assert!(matches!(err, StoreError::CorruptRecord { id, .. } if id == saved.id));
    }
}
