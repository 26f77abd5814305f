//! Crash Recovery Tests
//!
//! An engine is "crashed" by dropping it without `shutdown`, so nothing beyond
//! what each call made durable survives. Reopening on the same directory must
//! restore every acknowledged write and an index consistent with it.

mod common;

use common::*;
use quiver::storage::BlockStorage;
use quiver::{DeleteRequest, GetRequest, Include, MetadataValue, QueryRequest, RecordBatch, Scope};

async fn add_range(collection: &quiver::Collection, from: usize, to: usize) {
    let ids: Vec<String> = (from..to).map(|i| format!("id{}", i)).collect();
    collection
        .add(
            RecordBatch::new(ids)
                .embeddings((from..to).map(|i| seeded_vector(8, i as u64)).collect())
                .metadatas((from..to).map(|i| Some(metadata([("n", i as i64)]))).collect()),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_acknowledged_writes_survive_crash() {
    let (_dir, path, engine) = temp_engine(test_engine_config()).await;
    let collection = engine
        .create_collection(&Scope::default(), "durable", Some(metadata([("owner", "me")])), None, false)
        .await
        .unwrap();
    let id = collection.id();

    add_range(&collection, 0, 15).await;
    collection
        .update(RecordBatch::new(["id3"]).metadatas(vec![Some(metadata([("extra", true)]))]))
        .await
        .unwrap();
    collection.delete(DeleteRequest::ids(["id7"])).await.unwrap();
    drop(collection);
    drop(engine);

    let engine = reopen_engine(test_engine_config(), &path).await;
    let collection = engine.get_collection(&Scope::default(), "durable").await.unwrap();
    assert_eq!(collection.id(), id);
    assert_eq!(collection.metadata().unwrap()["owner"], MetadataValue::Str("me".into()));
    assert_eq!(collection.count().await.unwrap(), 14);

    let got = collection.get(GetRequest::ids(["id3", "id7"])).await.unwrap();
    assert_eq!(got.ids, vec!["id3"]);
    let merged = got.metadatas.unwrap()[0].clone().unwrap();
    assert_eq!(merged["n"], MetadataValue::Int(3));
    assert_eq!(merged["extra"], MetadataValue::Bool(true));

    // Insertion order survives as well
    let got = collection.get(GetRequest::default()).await.unwrap();
    assert_eq!(got.ids.first().map(String::as_str), Some("id0"));
    assert_eq!(got.ids.last().map(String::as_str), Some("id14"));
}

#[tokio::test]
async fn test_index_behind_store_is_caught_up_on_open() {
    let (_dir, path, engine) = temp_engine(test_engine_config()).await;
    let collection = engine
        .create_collection(&Scope::default(), "catchup", None, None, false)
        .await
        .unwrap();

    add_range(&collection, 0, 5).await;
    collection.persist().await.unwrap();
    let persisted = collection.stats().sync.persisted_version;

    add_range(&collection, 5, 8).await;
    collection.delete(DeleteRequest::ids(["id1"])).await.unwrap();
    assert!(collection.stats().version > persisted);
    drop(collection);
    drop(engine);

    let engine = reopen_engine(test_engine_config(), &path).await;
    let collection = engine.get_collection(&Scope::default(), "catchup").await.unwrap();
    let stats = collection.stats();
    assert_eq!(stats.count, 7);
    assert_eq!(stats.sync.index_version, stats.version);
    assert_eq!(stats.sync.index_len, 7);

    let hits = collection
        .query(QueryRequest::embeddings(vec![seeded_vector(8, 6)], 1))
        .await
        .unwrap();
    assert_eq!(hits.ids[0], vec!["id6"]);

    let hits = collection
        .query(QueryRequest::embeddings(vec![seeded_vector(8, 1)], 7))
        .await
        .unwrap();
    assert!(!hits.ids[0].contains(&"id1".to_string()));
}

#[tokio::test]
async fn test_torn_wal_tail_is_discarded() {
    let (_dir, path, engine) = temp_engine(test_engine_config()).await;
    let collection = engine
        .create_collection(&Scope::default(), "torn", None, None, false)
        .await
        .unwrap();
    add_range(&collection, 0, 4).await;
    let wal_path = format!("collections/{}/wal.log", collection.id());
    drop(collection);
    drop(engine);

    // Half-written entry after the last acknowledged one
    let storage = reopen_storage(&path);
    storage.append(&wal_path, b"2LAW\x01\x02\x03").await.unwrap();
    drop(storage);

    let engine = reopen_engine(test_engine_config(), &path).await;
    let collection = engine.get_collection(&Scope::default(), "torn").await.unwrap();
    assert_eq!(collection.count().await.unwrap(), 4);

    // New writes land after the valid prefix and survive another restart
    add_range(&collection, 4, 6).await;
    drop(collection);
    drop(engine);

    let engine = reopen_engine(test_engine_config(), &path).await;
    let collection = engine.get_collection(&Scope::default(), "torn").await.unwrap();
    assert_eq!(collection.count().await.unwrap(), 6);
}

#[tokio::test]
async fn test_corrupt_index_artifact_is_rebuilt() {
    let (_dir, path, engine) = temp_engine(test_engine_config()).await;
    let collection = engine
        .create_collection(&Scope::default(), "rebuild", None, None, false)
        .await
        .unwrap();
    add_range(&collection, 0, 30).await;
    collection.persist().await.unwrap();
    let index_path = format!("collections/{}/index.bin", collection.id());
    drop(collection);
    drop(engine);

    let storage = reopen_storage(&path);
    storage.write(&index_path, b"not an index").await.unwrap();
    storage.sync(&index_path).await.unwrap();
    drop(storage);

    let engine = reopen_engine(test_engine_config(), &path).await;
    let collection = engine.get_collection(&Scope::default(), "rebuild").await.unwrap();
    let stats = collection.stats();
    assert_eq!(stats.count, 30);
    assert_eq!(stats.sync.index_len, 30);
    assert_eq!(stats.sync.index_version, stats.version);

    for i in [0u64, 11, 29] {
        let hits = collection
            .query(QueryRequest::embeddings(vec![seeded_vector(8, i)], 1))
            .await
            .unwrap();
        assert_eq!(hits.ids[0], vec![format!("id{}", i)]);
    }
}

#[tokio::test]
async fn test_checkpointed_store_recovers() {
    let config = quiver::EngineConfig {
        wal_checkpoint_entries: 5,
        ..test_engine_config()
    };
    let (_dir, path, engine) = temp_engine(config.clone()).await;
    let collection = engine
        .create_collection(&Scope::default(), "checkpoint", None, None, false)
        .await
        .unwrap();

    for i in 0..23 {
        add_range(&collection, i, i + 1).await;
    }
    collection.delete(DeleteRequest::ids(["id0", "id22"])).await.unwrap();
    let version = collection.stats().version;
    drop(collection);
    drop(engine);

    let engine = reopen_engine(config, &path).await;
    let collection = engine.get_collection(&Scope::default(), "checkpoint").await.unwrap();
    let stats = collection.stats();
    assert_eq!(stats.count, 21);
    assert_eq!(stats.version, version);
    assert_eq!(stats.sync.index_len, 21);
    assert_eq!(stats.dimension, Some(8));

    let got = collection
        .get(GetRequest::ids(["id5"]).include(vec![Include::Embeddings]))
        .await
        .unwrap();
    assert_eq!(got.embeddings.unwrap()[0], seeded_vector(8, 5));

    // Sequences keep increasing past the snapshot
    add_range(&collection, 100, 101).await;
    assert_eq!(collection.stats().version, version + 1);
}

#[tokio::test]
async fn test_reopened_collection_needs_embedding_function_rebound() {
    let (_dir, path, engine) = temp_engine(test_engine_config()).await;
    engine
        .create_collection(&Scope::default(), "unbound", None, None, false)
        .await
        .unwrap();
    drop(engine);

    let engine = reopen_engine(test_engine_config(), &path).await;
    let collection = engine.get_collection(&Scope::default(), "unbound").await.unwrap();
    assert!(collection.embedding_function().is_none());
    assert_eq!(collection.count().await.unwrap(), 0);
    assert_eq!(collection.stats().sync.index_len, 0);
}

async fn ids_in(collection: &quiver::Collection) -> Vec<String> {
    collection.get(GetRequest::default()).await.unwrap().ids
}

#[tokio::test]
async fn test_failed_wal_sync_is_rolled_back_before_restart() {
    let (_dir, path, fs) = temp_storage_with_path();
    let storage = std::sync::Arc::new(FailingStorage::new(fs));
    let engine = quiver::Engine::open(test_engine_config(), storage.clone()).await.unwrap();
    let collection = engine
        .create_collection(&Scope::default(), "unsynced", None, None, false)
        .await
        .unwrap();
    collection
        .add(RecordBatch::new(["a"]).embeddings(vec![vec![1.0, 0.0]]))
        .await
        .unwrap();

    // Append lands, fsync fails: the caller is told the write did not happen
    storage.fail_once("sync", "wal.log");
    let err = collection
        .add(RecordBatch::new(["b"]).embeddings(vec![vec![0.0, 1.0]]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "WalError");
    assert_eq!(collection.count().await.unwrap(), 1);

    collection
        .add(RecordBatch::new(["c"]).embeddings(vec![vec![1.0, 1.0]]))
        .await
        .unwrap();
    let acknowledged = ids_in(&collection).await;
    assert_eq!(acknowledged, vec!["a", "c"]);
    let version = collection.stats().version;
    drop(collection);
    drop(engine);

    let engine = reopen_engine(test_engine_config(), &path).await;
    let collection = engine.get_collection(&Scope::default(), "unsynced").await.unwrap();
    assert_eq!(ids_in(&collection).await, acknowledged);
    assert_eq!(collection.stats().version, version);
}

#[tokio::test]
async fn test_wal_refuses_writes_when_rollback_fails() {
    let (_dir, path, fs) = temp_storage_with_path();
    let storage = std::sync::Arc::new(FailingStorage::new(fs));
    let engine = quiver::Engine::open(test_engine_config(), storage.clone()).await.unwrap();
    let collection = engine
        .create_collection(&Scope::default(), "stuck", None, None, false)
        .await
        .unwrap();
    collection
        .add(RecordBatch::new(["a"]).embeddings(vec![vec![1.0, 0.0]]))
        .await
        .unwrap();

    // Both the append's fsync and the rollback's fsync fail
    storage.fail_on("sync", "wal.log");
    let err = collection
        .add(RecordBatch::new(["b"]).embeddings(vec![vec![0.0, 1.0]]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "WalError");

    storage.heal();
    let err = collection
        .add(RecordBatch::new(["c"]).embeddings(vec![vec![1.0, 1.0]]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "WalError");
    assert_eq!(ids_in(&collection).await, vec!["a"]);
    drop(collection);
    drop(engine);

    // Reopening re-derives the log's valid prefix
    let engine = reopen_engine(test_engine_config(), &path).await;
    let collection = engine.get_collection(&Scope::default(), "stuck").await.unwrap();
    assert_eq!(ids_in(&collection).await, vec!["a"]);
    collection
        .add(RecordBatch::new(["c"]).embeddings(vec![vec![1.0, 1.0]]))
        .await
        .unwrap();
    assert_eq!(ids_in(&collection).await, vec!["a", "c"]);
}

#[tokio::test]
async fn test_failed_checkpoint_does_not_fail_durable_write() {
    let config = quiver::EngineConfig {
        wal_checkpoint_entries: 3,
        ..test_engine_config()
    };
    let (_dir, path, fs) = temp_storage_with_path();
    let storage = std::sync::Arc::new(FailingStorage::new(fs));
    let engine = quiver::Engine::open(config.clone(), storage.clone()).await.unwrap();
    let collection = engine
        .create_collection(&Scope::default(), "snapless", None, None, false)
        .await
        .unwrap();

    storage.fail_on("write", "records.snap.tmp");
    for i in 0..5 {
        let outcome = collection
            .add(RecordBatch::new([format!("id{}", i)]).embeddings(vec![seeded_vector(4, i)]))
            .await
            .unwrap();
        assert_eq!(outcome.written.len(), 1);
    }
    assert_eq!(collection.count().await.unwrap(), 5);
    assert_eq!(collection.stats().version, 5);
    assert!(!storage
        .exists(&format!("collections/{}/records.snap", collection.id()))
        .await
        .unwrap());

    // Once the snapshot can be written again the next write checkpoints
    storage.heal();
    collection
        .add(RecordBatch::new(["id5"]).embeddings(vec![seeded_vector(4, 5)]))
        .await
        .unwrap();
    assert!(storage
        .exists(&format!("collections/{}/records.snap", collection.id()))
        .await
        .unwrap());
    drop(collection);
    drop(engine);

    let engine = reopen_engine(config, &path).await;
    let collection = engine.get_collection(&Scope::default(), "snapless").await.unwrap();
    assert_eq!(collection.count().await.unwrap(), 6);
    assert_eq!(collection.stats().version, 6);
}
