use storage::repository::{KeyValueStore, Storage};
use storage::sqlite::SqliteStore;

#[tokio::test]
async fn sqlite_round_trips_values() {
    let store = SqliteStore::connect("sqlite:file:memdb_kv_roundtrip?mode=memory&cache=shared")
        .await
        .expect("connect");
    store.migrate().await.expect("migrate");

    assert_eq!(store.get("lesson-ledger:s1").await.unwrap(), None);

    store.set("lesson-ledger:s1", r#"{"v":1}"#).await.unwrap();
    store.set("lesson-ledger:s1", r#"{"v":2}"#).await.unwrap();
    assert_eq!(
        store.get("lesson-ledger:s1").await.unwrap().as_deref(),
        Some(r#"{"v":2}"#)
    );

    store.remove("lesson-ledger:s1").await.unwrap();
    assert_eq!(store.get("lesson-ledger:s1").await.unwrap(), None);
    store.remove("lesson-ledger:s1").await.expect("removing a missing key succeeds");
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let store = SqliteStore::connect("sqlite:file:memdb_kv_migrate?mode=memory&cache=shared")
        .await
        .expect("connect");
    store.migrate().await.expect("first migrate");
    store.migrate().await.expect("second migrate");

    store.set("k", "v").await.unwrap();
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
}

#[tokio::test]
async fn storage_handle_uses_sqlite_backend() {
    let storage = Storage::sqlite("sqlite:file:memdb_kv_handle?mode=memory&cache=shared")
        .await
        .expect("storage");
    storage.kv.set("a", "b").await.unwrap();
    assert_eq!(storage.kv.get("a").await.unwrap().as_deref(), Some("b"));
}

#[tokio::test]
async fn values_live_in_the_kv_entries_table() {
    let store = SqliteStore::connect("sqlite:file:memdb_kv_table?mode=memory&cache=shared")
        .await
        .expect("connect");
    store.migrate().await.expect("migrate");
    store.set("lesson-ledger:s2", "{}").await.unwrap();

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM kv_entries WHERE key = ?1")
        .bind("lesson-ledger:s2")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
}
