//! Applying transport-pushed `SyncEvent`s to the cache.

use chatvault::{MessageStore, SyncEvent};
use serde_json::json;

#[tokio::test]
async fn applies_each_event_kind() {
    let store = MessageStore::open_in_memory().await.unwrap();

    let received: SyncEvent = serde_json::from_value(json!({
        "type": "MessageReceived",
        "data": {"conversationId": "room1", "payload": {"text": "hi", "status": "sent"}}
    }))
    .unwrap();
    let record = store.apply(received).await.unwrap().unwrap();
    assert_eq!(record.conversation_id, "room1");

    let receipt: SyncEvent = serde_json::from_value(json!({
        "type": "MessageUpdated",
        "data": {"id": record.id, "patch": {"status": "read"}}
    }))
    .unwrap();
    assert_eq!(store.apply(receipt).await.unwrap(), None);
    let fetched = store.get_by_id(record.id).await.unwrap().unwrap();
    assert_eq!(fetched.field("status"), Some(&json!("read")));
    assert_eq!(fetched.field("text"), Some(&json!("hi")));

    store
        .apply(SyncEvent::MessageDeleted { id: record.id })
        .await
        .unwrap();
    assert_eq!(store.get_by_id(record.id).await.unwrap(), None);
}

#[tokio::test]
async fn conversation_cleared_and_reset() {
    let store = MessageStore::open_in_memory().await.unwrap();
    for c in ["room1", "room1", "room2"] {
        store
            .apply(SyncEvent::MessageReceived {
                conversation_id: c.into(),
                payload: Default::default(),
            })
            .await
            .unwrap();
    }

    store
        .apply(SyncEvent::ConversationCleared {
            conversation_id: "room1".into(),
        })
        .await
        .unwrap();
    assert!(store.get_by_conversation("room1").await.unwrap().is_empty());
    assert_eq!(store.get_by_conversation("room2").await.unwrap().len(), 1);

    store.apply(SyncEvent::Reset).await.unwrap();
    assert!(store.conversations().await.unwrap().is_empty());
}
