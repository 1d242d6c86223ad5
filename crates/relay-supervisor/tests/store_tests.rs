//! Message store persistence, binding and the flush timer.

use std::sync::Arc;
use std::time::Duration;

use relay_core::{
    EventBus, MessageKey, MessageLookup, MessageUpdate, SocketEvent, UpsertKind, WireMessage,
};
use relay_supervisor::store::EMPTY_SENTINEL;
use relay_supervisor::{FlushTimer, MessageStore, StoreError};
use relay_testkit::text_batch;
use serde_json::json;

#[tokio::test]
async fn missing_empty_and_sentinel_files_give_empty_store() {
    let dir = tempfile::tempdir().unwrap();

    let missing = MessageStore::try_load(dir.path().join("absent.json")).await.unwrap();
    assert_eq!(missing.message_count(), 0);

    let empty_path = dir.path().join("empty.json");
    std::fs::write(&empty_path, "  \n").unwrap();
    assert_eq!(MessageStore::try_load(&empty_path).await.unwrap().chat_count(), 0);

    let sentinel_path = dir.path().join("sentinel.json");
    std::fs::write(&sentinel_path, EMPTY_SENTINEL).unwrap();
    assert_eq!(MessageStore::try_load(&sentinel_path).await.unwrap().message_count(), 0);
}

#[tokio::test]
async fn malformed_file_is_a_load_error_and_recovers_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = MessageStore::try_load(&path).await.unwrap_err();
    assert!(matches!(err, StoreError::Load { .. }));

    let store = MessageStore::load(&path).await;
    assert_eq!(store.message_count(), 0);
    assert_eq!(store.path(), path.as_path());
}

#[tokio::test]
async fn flush_then_load_restores_messages() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");

    let store = MessageStore::empty(&path);
    store.apply(&text_batch("chat@s.whatsapp.net", 3));
    store.flush().await.unwrap();

    let reloaded = MessageStore::load(&path).await;
    assert_eq!(reloaded.message_count(), 3);
    assert_eq!(
        reloaded.get_message(&MessageKey::new("chat@s.whatsapp.net", "m1")),
        json!({ "conversation": "text 1" })
    );
}

#[tokio::test]
async fn arrival_order_survives_flush_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let ids = ["3EB0F1", "3EB0A2", "BAE5C3"];

    let store = MessageStore::empty(&path);
    store.apply(&SocketEvent::MessagesUpsert {
        messages: ids
            .iter()
            .map(|id| WireMessage::text(MessageKey::new("c@s", *id), *id))
            .collect(),
        kind: UpsertKind::Notify,
    });
    store.flush().await.unwrap();

    let reloaded = MessageStore::load(&path).await.snapshot();
    let order: Vec<&str> = reloaded.messages["c@s"]
        .iter()
        .map(|m| m.key.id.as_str())
        .collect();
    assert_eq!(order, ids);
}

#[tokio::test]
async fn binding_applies_events_until_unsubscribed() {
    let bus = EventBus::default();
    let store = Arc::new(MessageStore::empty("unused.json"));
    let binding = store.bind(bus.subscribe());

    bus.emit(text_batch("a@s", 2));
    bus.emit(SocketEvent::MessagesUpdate(vec![MessageUpdate::revoke(
        MessageKey::new("a@s", "m0"),
    )]));
    for _ in 0..100 {
        if store.load_message("a@s", "m0").and_then(|m| m.message_stub_type) == Some(2) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(store.message_count(), 2);
    assert_eq!(
        store.load_message("a@s", "m0").unwrap().message_stub_type,
        Some(2)
    );

    binding.unsubscribe();
    tokio::task::yield_now().await;
    bus.emit(text_batch("b@s", 1));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(store.load_message("b@s", "m0").is_none());
}

#[tokio::test]
async fn drain_applies_events_still_queued_for_the_binding() {
    let bus = EventBus::default();
    let store = Arc::new(MessageStore::empty("unused.json"));
    let binding = store.bind(bus.subscribe());

    for i in 0..20 {
        bus.emit(text_batch(&format!("chat{i}@s"), 5));
    }
    binding.drain().await;

    assert_eq!(store.message_count(), 100);
    assert_eq!(bus.subscriber_count(), 0);
}

#[tokio::test]
async fn try_flush_skips_while_a_flush_holds_the_lock() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MessageStore::empty(dir.path().join("store.json")));

    let (a, b) = tokio::join!(store.flush(), store.try_flush());
    a.unwrap();
    // The joined flush polls first and takes the lock before yielding.
    assert!(b.is_none());

    assert!(store.try_flush().await.expect("lock is free").is_ok());
}

#[tokio::test]
async fn flush_timer_writes_periodically_and_stops_on_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let store = Arc::new(MessageStore::empty(&path));
    store.apply(&text_batch("c@s", 1));

    let timer = FlushTimer::start(Arc::clone(&store), Duration::from_millis(100));
    assert!(timer.is_running());
    assert!(!path.exists());

    for _ in 0..400 {
        if path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(path.exists());
    assert_eq!(MessageStore::load(&path).await.message_count(), 1);

    timer.cancel();
    std::fs::remove_file(&path).unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(!path.exists());
}
