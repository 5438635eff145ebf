//! Mutex tests against a live Redis
//!
//! Disabled by default; run with: cargo test -- --ignored
//! The server is taken from `REDIS_URL` (default redis://localhost:6379).

use armature_distributed::*;
use armature_redis::{KeyValueStore, RedisConfig, RedisStore, ScriptCaching};
use std::sync::Arc;
use std::time::Duration;

async fn connect() -> Arc<ScriptCaching<RedisStore>> {
    let config = RedisConfig::from_env().build();
    let store = RedisStore::connect(&config).await.unwrap();
    Arc::new(ScriptCaching::new(store))
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_lock_cycle_against_redis() {
    let store = connect().await;
    let mutex = DistributedMutex::new(store.clone());
    let other = DistributedMutex::with_key(store.clone(), mutex.key());

    assert!(mutex.try_lock().await.unwrap());
    assert!(!other.try_lock().await.unwrap());
    assert!(other.is_locked().await.unwrap());
    assert!(!other.is_owned().await.unwrap());

    let ttl = store.ttl(mutex.key()).await.unwrap().unwrap();
    assert!(ttl.abs_diff(mutex.timeout()) <= Duration::from_secs(1));

    store.expire(mutex.key(), 10).await.unwrap();
    assert!(mutex.refresh().await.unwrap());
    let ttl = store.ttl(mutex.key()).await.unwrap().unwrap();
    assert!(ttl.abs_diff(mutex.timeout()) <= Duration::from_secs(1));

    assert!(mutex.unlock().await.unwrap());
    assert!(!mutex.unlock().await.unwrap());
    assert!(other.try_lock().await.unwrap());
    assert!(other.unlock().await.unwrap());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_recursive_lock_against_redis() {
    let store = connect().await;
    let mutex = DistributedMutex::new(store);

    mutex.lock().await.unwrap();
    assert!(matches!(mutex.lock().await, Err(MutexError::Deadlock { .. })));
    assert!(mutex.unlock().await.unwrap());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_synchronize_against_redis() {
    let store = connect().await;
    let mutex = DistributedMutex::new(store.clone());
    let other = DistributedMutex::with_key(store.clone(), mutex.key());

    let result = mutex.synchronize(|| async { 1 }).await.unwrap();
    assert_eq!(result, 1);
    assert!(!mutex.is_locked().await.unwrap());

    assert!(mutex.try_lock().await.unwrap());
    let waited = tokio::time::timeout(Duration::from_secs(1), other.synchronize(|| async { 1 })).await;
    assert!(waited.is_err());
    assert!(mutex.unlock().await.unwrap());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_refresh_fails_after_expiry_against_redis() {
    let store = connect().await;
    let mutex = MutexBuilder::new()
        .timeout(Duration::from_secs(1))
        .build(store.clone());

    assert!(mutex.try_lock().await.unwrap());
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(!mutex.is_locked().await.unwrap());
    assert!(!mutex.refresh().await.unwrap());
}
