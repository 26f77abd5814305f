//! Collection registry tests

mod common;

use common::*;
use quiver::{EngineConfig, MetadataValue, RecordBatch, Scope};

#[tokio::test]
async fn test_create_get_and_get_or_create() {
    let engine = memory_engine(test_engine_config()).await;
    let scope = Scope::default();

    let created = engine
        .create_collection(&scope, "docs", Some(metadata([("owner", "ops")])), None, false)
        .await
        .unwrap();
    let fetched = engine.get_collection(&scope, "docs").await.unwrap();
    assert_eq!(created.id(), fetched.id());
    assert_eq!(fetched.metadata().unwrap()["owner"], MetadataValue::Str("ops".into()));

    let err = engine
        .create_collection(&scope, "docs", None, None, false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "UniqueConstraintError");
    assert_eq!(err.to_string(), "Collection docs already exists");

    let again = engine
        .get_or_create_collection(&scope, "docs", None, None)
        .await
        .unwrap();
    assert_eq!(again.id(), created.id());
    assert_eq!(engine.count_collections(&scope).await.unwrap(), 1);
}

#[tokio::test]
async fn test_missing_collection_not_found() {
    let engine = memory_engine(test_engine_config()).await;
    let err = engine
        .get_collection(&Scope::default(), "nope")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "NotFoundError");
    assert_eq!(err.to_string(), "Collection nope does not exist");

    let err = engine
        .delete_collection(&Scope::default(), "nope")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "NotFoundError");
}

#[tokio::test]
async fn test_collection_name_rules() {
    let engine = memory_engine(test_engine_config()).await;
    let too_long = "x".repeat(64);
    for bad in ["ab", "-abc", "abc-", "a..b", "has space", too_long.as_str()] {
        let err = engine
            .create_collection(&Scope::default(), bad, None, None, false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument", "name {:?}", bad);
    }
    for good in ["abc", "my-collection_1", "a.b.c", "A1b"] {
        engine
            .create_collection(&Scope::default(), good, None, None, false)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_invalid_collection_settings_rejected() {
    let engine = memory_engine(test_engine_config()).await;
    let scope = Scope::default();

    let err = engine
        .create_collection(
            &scope,
            "inverted",
            Some(metadata([("hnsw:batch_size", 50i64), ("hnsw:sync_threshold", 10i64)])),
            None,
            false,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "InvalidArgument");
    assert!(err.to_string().contains("hnsw:batch_size"));

    let err = engine
        .create_collection(&scope, "unknown", Some(metadata([("hnsw:bogus", 1i64)])), None, false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "InvalidArgument");

    let err = engine
        .create_collection(&scope, "space", Some(metadata([("hnsw:space", "manhattan")])), None, false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "InvalidArgument");

    assert_eq!(engine.count_collections(&scope).await.unwrap(), 0);
}

#[tokio::test]
async fn test_scopes_are_isolated() {
    let engine = memory_engine(test_engine_config()).await;
    let alpha = Scope::new("tenant-a", "db");
    let beta = Scope::new("tenant-b", "db");

    let a = engine.create_collection(&alpha, "shared", None, None, false).await.unwrap();
    let b = engine.create_collection(&beta, "shared", None, None, false).await.unwrap();
    assert_ne!(a.id(), b.id());

    a.add(RecordBatch::new(["x"]).embeddings(vec![vec![1.0]])).await.unwrap();
    assert_eq!(b.count().await.unwrap(), 0);

    assert_eq!(engine.list_collections(&alpha, None, None).await.unwrap().len(), 1);
    assert!(engine
        .get_collection(&Scope::default(), "shared")
        .await
        .is_err());
}

#[tokio::test]
async fn test_list_collections_paginates_oldest_first() {
    let engine = memory_engine(test_engine_config()).await;
    let scope = Scope::default();
    for name in ["first", "second", "third", "fourth"] {
        engine.create_collection(&scope, name, None, None, false).await.unwrap();
    }

    let names: Vec<String> = engine
        .list_collections(&scope, None, None)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names.len(), 4);

    let page: Vec<String> = engine
        .list_collections(&scope, Some(2), Some(1))
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(page, names[1..3].to_vec());
    assert_eq!(engine.count_collections(&scope).await.unwrap(), 4);
}

#[tokio::test]
async fn test_modify_renames_and_protects_settings() {
    let engine = memory_engine(test_engine_config()).await;
    let scope = Scope::default();
    let collection = engine
        .create_collection(
            &scope,
            "before",
            Some(metadata([("hnsw:space", "cosine")])),
            None,
            false,
        )
        .await
        .unwrap();
    let id = collection.id();

    engine
        .modify_collection(&id, Some("after"), Some(metadata([("team", "search")])))
        .await
        .unwrap();
    assert!(engine.get_collection(&scope, "before").await.is_err());
    let renamed = engine.get_collection(&scope, "after").await.unwrap();
    assert_eq!(renamed.id(), id);

    // Omitted settings carry over
    let metadata_now = renamed.metadata().unwrap();
    assert_eq!(metadata_now["team"], MetadataValue::Str("search".into()));
    assert_eq!(metadata_now["hnsw:space"], MetadataValue::Str("cosine".into()));

    let err = engine
        .modify_collection(&id, None, Some(metadata([("hnsw:space", "l2")])))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "InvalidArgument");
    assert_eq!(
        renamed.metadata().unwrap()["hnsw:space"],
        MetadataValue::Str("cosine".into())
    );

    engine.create_collection(&scope, "taken", None, None, false).await.unwrap();
    let err = engine
        .modify_collection(&id, Some("taken"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "UniqueConstraintError");
}

#[tokio::test]
async fn test_delete_collection_removes_files_and_handle() {
    let (_dir, path, engine) = temp_engine(test_engine_config()).await;
    let scope = Scope::default();
    let collection = engine.create_collection(&scope, "doomed", None, None, false).await.unwrap();
    collection
        .add(RecordBatch::new(["a"]).embeddings(vec![vec![1.0, 2.0]]))
        .await
        .unwrap();
    let dir = path.join(format!("collections/{}", collection.id()));
    assert!(dir.exists());

    engine.delete_collection(&scope, "doomed").await.unwrap();
    assert!(!dir.exists());
    assert!(engine.get_collection(&scope, "doomed").await.is_err());

    let err = collection
        .add(RecordBatch::new(["b"]).embeddings(vec![vec![1.0, 2.0]]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "NotFoundError");

    // The name is free again
    let fresh = engine.create_collection(&scope, "doomed", None, None, false).await.unwrap();
    assert_eq!(fresh.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_reset_requires_permission() {
    let engine = memory_engine(EngineConfig::default()).await;
    engine
        .create_collection(&Scope::default(), "kept", None, None, false)
        .await
        .unwrap();
    let err = engine.reset().await.unwrap_err();
    assert_eq!(err.kind(), "InvalidArgument");
    assert_eq!(engine.count_collections(&Scope::default()).await.unwrap(), 1);

    let engine = memory_engine(test_engine_config()).await;
    let collection = engine
        .create_collection(&Scope::default(), "wiped", None, None, false)
        .await
        .unwrap();
    engine.reset().await.unwrap();
    assert_eq!(engine.count_collections(&Scope::default()).await.unwrap(), 0);
    assert!(collection.count().await.is_err());
}

#[tokio::test]
async fn test_server_level_operations() {
    let engine = memory_engine(test_engine_config()).await;
    assert!(engine.heartbeat() > 0);
    assert_eq!(engine.version(), env!("CARGO_PKG_VERSION"));
    assert_eq!(engine.max_batch_size(), EngineConfig::default().max_batch_size);

    let collection = engine
        .create_collection(&Scope::default(), "limited", None, None, false)
        .await
        .unwrap();
    let too_many = engine.max_batch_size() + 1;
    let err = collection
        .add(
            RecordBatch::new((0..too_many).map(|i| format!("id{}", i)))
                .embeddings(vec![vec![0.0]; too_many]),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "InvalidArgument");
}

#[tokio::test]
async fn test_shutdown_persists_and_refuses_calls() {
    let (_dir, path, engine) = temp_engine(test_engine_config()).await;
    let collection = engine
        .create_collection(&Scope::default(), "closing", None, None, false)
        .await
        .unwrap();
    collection
        .add(RecordBatch::new(["a", "b"]).embeddings(vec![vec![1.0], vec![2.0]]))
        .await
        .unwrap();
    assert_eq!(collection.stats().sync.pending, 2);

    engine.shutdown().await.unwrap();
    let stats = collection.stats();
    assert_eq!(stats.sync.pending, 0);
    assert_eq!(stats.sync.persisted_version, stats.version);
    assert_eq!(collection.count().await.unwrap_err().kind(), "Cancelled");
    assert!(path.join(format!("collections/{}/index.bin", collection.id())).exists());
}
