use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Caller-supplied message fields. Opaque to the store.
pub type Payload = serde_json::Map<String, Value>;

/// Keys the store owns on every record. Payloads and patches cannot set them.
pub const RESERVED_KEYS: [&str; 3] = ["id", "conversationId", "timestamp"];

pub fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Removes reserved keys from a payload, returning the keys that were dropped.
pub fn strip_reserved(payload: &mut Payload) -> Vec<String> {
    let dropped: Vec<String> = payload
        .keys()
        .filter(|k| is_reserved(k))
        .cloned()
        .collect();
    for key in &dropped {
        payload.remove(key);
    }
    dropped
}

/// A cached chat message.
///
/// Serializes as the merged object `{id, conversationId, timestamp, ...payload}`.
/// Values handed out by the store are copies; mutating them has no effect on
/// stored state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: i64,
    pub conversation_id: String,
    #[serde(with = "timestamp::serde_millis")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: Payload,
}

impl MessageRecord {
    /// Shorthand for reading a payload field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

/// Partial update for a stored record. Fields overwrite, everything else is kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPatch {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "timestamp::serde_millis::option"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub fields: Payload,
}

impl RecordPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp::truncate(ts));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.timestamp.is_none() && self.fields.is_empty()
    }

    /// Shallow merge onto `record`. `id` and `conversationId` never change;
    /// the timestamp only moves through the typed field.
    pub fn apply_to(&self, record: &mut MessageRecord) {
        if let Some(ts) = self.timestamp {
            record.timestamp = timestamp::truncate(ts);
        }
        for (key, value) in &self.fields {
            if is_reserved(key) {
                continue;
            }
            record.payload.insert(key.clone(), value.clone());
        }
    }
}

impl From<Payload> for RecordPatch {
    fn from(fields: Payload) -> Self {
        Self {
            timestamp: None,
            fields,
        }
    }
}

/// One row of the conversation list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub message_count: u64,
    #[serde(with = "timestamp::serde_millis")]
    pub latest_timestamp: DateTime<Utc>,
}

/// Timestamp encoding used on disk and on the wire.
///
/// Fixed-width RFC 3339 in UTC with millisecond precision, so lexical order
/// of the stored strings matches chronological order.
pub mod timestamp {
    use chrono::{DateTime, Datelike, SecondsFormat, SubsecRound, TimeDelta, Utc};

    const FLOOR: &str = "0000-01-01T00:00:00.000Z";
    const CEILING: &str = "9999-12-31T23:59:59.999Z";

    pub fn now() -> DateTime<Utc> {
        truncate(Utc::now())
    }

    pub fn truncate(ts: DateTime<Utc>) -> DateTime<Utc> {
        ts.trunc_subsecs(3)
    }

    /// Rounds up to the next whole millisecond when `ts` has a finer fraction.
    pub fn ceil(ts: DateTime<Utc>) -> DateTime<Utc> {
        let floor = truncate(ts);
        if floor < ts {
            floor
                .checked_add_signed(TimeDelta::milliseconds(1))
                .unwrap_or(floor)
        } else {
            floor
        }
    }

    /// Lower bound usable for "from the beginning" range queries.
    pub fn earliest() -> DateTime<Utc> {
        DateTime::<Utc>::MIN_UTC
    }

    /// Upper bound usable for "up to now and beyond" range queries.
    pub fn latest() -> DateTime<Utc> {
        DateTime::<Utc>::MAX_UTC
    }

    /// Years outside 0..=9999 clamp to the representable range.
    pub fn format(ts: &DateTime<Utc>) -> String {
        match ts.year() {
            y if y < 0 => FLOOR.to_string(),
            y if y > 9999 => CEILING.to_string(),
            _ => ts.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
    }

    pub mod serde_millis {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_str(&super::format(ts))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
            let raw = String::deserialize(d)?;
            super::parse(&raw).map_err(serde::de::Error::custom)
        }

        pub mod option {
            use chrono::{DateTime, Utc};
            use serde::{Deserialize, Deserializer, Serializer};

            pub fn serialize<S: Serializer>(
                ts: &Option<DateTime<Utc>>,
                s: S,
            ) -> Result<S::Ok, S::Error> {
                match ts {
                    Some(ts) => s.serialize_str(&crate::models::timestamp::format(ts)),
                    None => s.serialize_none(),
                }
            }

            pub fn deserialize<'de, D: Deserializer<'de>>(
                d: D,
            ) -> Result<Option<DateTime<Utc>>, D::Error> {
                let raw = Option::<String>::deserialize(d)?;
                raw.map(|raw| crate::models::timestamp::parse(&raw))
                    .transpose()
                    .map_err(serde::de::Error::custom)
            }
        }
    }
}
