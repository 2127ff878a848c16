//! The process-wide store is opened once.

use chatvault::{Payload, StoreConfig};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn init_opens_once_and_shares_the_handle() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::new(dir.path().join("cache.db"));
    assert!(chatvault::global().is_none());

    let mut handles = Vec::new();
    for _ in 0..4 {
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            chatvault::init(&config).await.unwrap() as *const _ as usize
        }));
    }
    let mut addrs = Vec::new();
    for handle in handles {
        addrs.push(handle.await.unwrap());
    }
    assert!(addrs.windows(2).all(|w| w[0] == w[1]));

    // A different config after initialization returns the existing store.
    let other = StoreConfig::new(dir.path().join("other.db"));
    let store = chatvault::init(&other).await.unwrap();
    let saved = store.save("room1", Payload::new()).await.unwrap();

    let global = chatvault::global().unwrap();
    assert_eq!(global.get_by_id(saved.id).await.unwrap(), Some(saved));
    assert!(!dir.path().join("other.db").exists());
}
