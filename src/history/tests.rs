use super::*;
use crate::common::model::Request;
use deadpool_redis::Pool;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;

fn redis_test_pool() -> Option<Pool> {
    let url = env::var("MATRIXCRAWL_REDIS_TEST_URL")
        .ok()
        .or_else(|| env::var("REDIS_URL").ok())?;
    let cfg = deadpool_redis::Config::from_url(url);
    cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1)).ok()
}

fn failed(url: &str, attempts: u32) -> Request {
    let mut req = Request::new("news", "detail", url).with_try_times(3);
    req.prepare().unwrap();
    req.attempts = attempts;
    req
}

/// Flushes a failure set, reloads it into a fresh store and compares.
async fn assert_failure_round_trip(backend: Arc<dyn HistoryBackend>, sub: &str) {
    let store = HistoryStore::new(backend.clone(), "news", sub);
    let reqs = [
        failed("https://example.com/a?x=1&y=2", 3),
        failed("https://example.com/b", 3),
        failed("https://example.com/c", 3),
    ];
    for req in &reqs {
        assert!(store.upsert_failure(req.clone()).await);
    }
    assert_eq!(store.flush_failure().await.unwrap(), 3);

    let reloaded = HistoryStore::new(backend.clone(), "news", sub);
    assert_eq!(reloaded.load_failure().await.unwrap(), 3);
    let pulled = reloaded.pull_failure().await;
    for req in &reqs {
        let restored = pulled.get(req.fingerprint()).expect("fingerprint survives flush");
        assert_eq!(restored.serialize().unwrap(), req.serialize().unwrap());
    }

    // a smaller set fully replaces the persisted one
    store.delete_failure(reqs[0].fingerprint()).await;
    store.delete_failure(reqs[1].fingerprint()).await;
    assert_eq!(store.flush_failure().await.unwrap(), 1);
    let again = HistoryStore::new(backend.clone(), "news", sub);
    assert_eq!(again.load_failure().await.unwrap(), 1);
    assert!(again.has_failure(reqs[2].fingerprint()).await);

    // empty flush clears it
    store.pull_failure().await;
    assert_eq!(store.flush_failure().await.unwrap(), 0);
    let empty = HistoryStore::new(backend, "news", sub);
    assert_eq!(empty.load_failure().await.unwrap(), 0);
}

#[tokio::test]
async fn file_backend_failure_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FileBackend::new(dir.path()));
    assert_failure_round_trip(backend.clone(), "").await;
    assert!(!backend.path_of("history__n__news").exists());
}

#[tokio::test]
async fn file_backend_writes_plain_ampersand() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FileBackend::new(dir.path()));
    let store = HistoryStore::new(backend.clone(), "news", "");
    store.upsert_failure(failed("https://example.com/?a=1&b=2", 3)).await;
    store.flush_failure().await.unwrap();

    let raw = std::fs::read_to_string(backend.path_of("history__n__news")).unwrap();
    assert!(raw.contains("a=1&b=2"));
    assert!(!raw.contains("\\u0026"));
}

#[tokio::test]
async fn file_backend_reports_io_class() {
    let dir = tempfile::tempdir().unwrap();
    // a regular file where the directory should be
    let blocker = dir.path().join("not_a_dir");
    std::fs::write(&blocker, b"x").unwrap();
    let store = HistoryStore::new(Arc::new(FileBackend::new(&blocker)), "news", "");
    store.upsert_failure(failed("https://example.com/a", 3)).await;

    let err = store.flush_failure().await.unwrap_err();
    assert!(err.is_history());
    assert_eq!(err.storage_class(), Some(crate::errors::StorageErrorClass::Io));
    // memory stays authoritative
    assert_eq!(store.failure_len().await, 1);
}

#[tokio::test]
async fn sql_backend_failure_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("history.db").display());
    let backend = Arc::new(SqlBackend::connect(&url).await.unwrap());
    assert_failure_round_trip(backend, "5d41402abc4b2a76b9719d911017c592").await;
}

#[tokio::test]
async fn sql_backend_success_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("history.db").display());
    let backend: Arc<dyn HistoryBackend> = Arc::new(SqlBackend::connect(&url).await.unwrap());

    let store = HistoryStore::new(backend.clone(), "news", "");
    let req = failed("https://example.com/ok", 0);
    assert!(store.upsert_success(&req).await.unwrap());
    assert!(!store.upsert_success(&req).await.unwrap());
    assert_eq!(store.flush_success().await.unwrap(), 1);

    let reloaded = HistoryStore::new(backend, "news", "");
    assert_eq!(reloaded.load_success().await.unwrap(), 1);
    assert!(reloaded.has_success(req.fingerprint()).await);
}

#[tokio::test]
async fn redis_backend_failure_round_trip() {
    let Some(pool) = redis_test_pool() else {
        return;
    };
    let namespace = format!("matrixcrawl_test_{}", std::process::id());
    let backend = Arc::new(RedisBackend::new(pool, namespace));
    assert_failure_round_trip(backend, "redis").await;
}

#[tokio::test]
async fn local_backend_failure_round_trip() {
    assert_failure_round_trip(Arc::new(LocalBackend::new()), "").await;
}

#[tokio::test]
async fn pull_failure_swaps_out_the_set() {
    let store = HistoryStore::new(Arc::new(LocalBackend::new()), "news", "");
    let a = failed("https://example.com/a", 3);
    let b = failed("https://example.com/b", 3);
    assert!(store.upsert_failure(a.clone()).await);

    let batch = store.pull_failure().await;
    assert_eq!(batch.len(), 1);
    assert!(batch.contains_key(a.fingerprint()));
    assert_eq!(store.failure_len().await, 0);

    assert!(store.upsert_failure(b.clone()).await);
    assert_eq!(store.failure_len().await, 1);
    assert!(!store.has_failure(a.fingerprint()).await);
}

#[tokio::test]
async fn upsert_failure_never_overwrites() {
    let store = HistoryStore::new(Arc::new(LocalBackend::new()), "news", "");
    let first = failed("https://example.com/a", 3);
    let mut second = first.clone();
    second.priority = 7;

    assert!(store.upsert_failure(first).await);
    assert!(!store.upsert_failure(second.clone()).await);
    let kept = store.pull_failure().await;
    assert_eq!(kept.get(second.fingerprint()).unwrap().priority, 0);

    // deleting an absent fingerprint is a no-op
    store.delete_failure("missing").await;
    assert_eq!(store.failure_len().await, 0);
}

#[tokio::test]
async fn build_backend_from_config() {
    let mut config = crate::common::model::Config::default();
    config.history.backend = crate::common::model::HistoryBackendKind::Memory;
    assert_eq!(build_backend(&config).await.unwrap().name(), "memory");

    config.history.backend = crate::common::model::HistoryBackendKind::Sql;
    config.history.database_url = None;
    assert!(build_backend(&config).await.err().is_some_and(|e| e.is_config()));
}

#[test]
fn collection_names_follow_spider_and_sub() {
    let store = HistoryStore::new(Arc::new(LocalBackend::new()), "news", "abc");
    assert_eq!(store.success_collection(), "history__y__news__abc");
    assert_eq!(store.failure_collection(), "history__n__news__abc");
}

#[tokio::test]
async fn file_backend_overlapping_flushes() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FileBackend::new(dir.path());
    let first: HashMap<String, String> = (0..50)
        .map(|i| (format!("fp{i}"), format!("{{\"n\":{i}}}")))
        .collect();
    let second: HashMap<String, String> = [("fp-x".to_string(), "{}".to_string())].into();

    let (a, b) = tokio::join!(
        backend.replace("history__n__news", RecordKind::Failure, &first),
        backend.replace("history__n__news", RecordKind::Failure, &second),
    );
    assert_eq!(a.unwrap(), 50);
    assert_eq!(b.unwrap(), 1);

    // one of the two sets wins whole
    let loaded = backend.load("history__n__news", RecordKind::Failure).await.unwrap();
    assert!(loaded == first || loaded == second);
    let leftovers = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .count();
    assert_eq!(leftovers, 0);
}
