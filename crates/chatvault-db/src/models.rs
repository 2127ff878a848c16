//! Database row types. These map directly to SQLite rows and are turned into
//! `chatvault_types` records at the edge of the crate.

use chatvault_types::models::timestamp;
use chatvault_types::{MessageRecord, Payload};
use rusqlite::Row;

use crate::error::{Result, StoreError};

/// Column list matching [`MessageRow::from_row`].
pub const MESSAGE_COLUMNS: &str = "id, conversation_id, timestamp, payload";

pub struct MessageRow {
    pub id: i64,
    pub conversation_id: String,
    pub timestamp: String,
    pub payload: String,
}

impl MessageRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            timestamp: row.get(2)?,
            payload: row.get(3)?,
        })
    }

    pub fn into_record(self) -> Result<MessageRecord> {
        let id = self.id;
        let corrupt = |reason: String| StoreError::CorruptRecord { id, reason };

        let timestamp = timestamp::parse(&self.timestamp)
            .map_err(|e| corrupt(format!("bad timestamp '{}': {}", self.timestamp, e)))?;
        let payload: Payload = serde_json::from_str(&self.payload)
            .map_err(|e| corrupt(format!("payload is not a JSON object: {}", e)))?;

        Ok(MessageRecord {
            id,
            conversation_id: self.conversation_id,
            timestamp,
            payload,
        })
    }
}

pub struct ConversationRow {
    pub conversation_id: String,
    pub message_count: i64,
    pub latest_timestamp: String,
    pub latest_id: i64,
}
