pub mod events;
pub mod models;

pub use events::SyncEvent;
pub use models::{ConversationSummary, MessageRecord, Payload, RecordPatch};
