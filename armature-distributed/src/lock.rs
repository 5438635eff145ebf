//! Distributed mutex over a shared key-value store

use armature_redis::scripts::{COMPARE_AND_DELETE, COMPARE_AND_EXPIRE};
use armature_redis::{KeyValueStore, StoreError};
use async_trait::async_trait;
use futures::FutureExt;
use once_cell::sync::OnceCell;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MutexConfig;

/// Distributed mutex errors
#[derive(Debug, Error)]
pub enum MutexError {
    /// `lock` was called by the instance that already holds the lock.
    #[error("Deadlock: recursive locking of {key}")]
    Deadlock { key: String },

    #[error("Timed out after {waited:?} waiting for lock {key}")]
    Timeout { key: String, waited: Duration },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Distributed lock trait
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// The store key the lock lives under
    fn key(&self) -> &str;

    /// Try to acquire the lock (non-blocking)
    async fn try_lock(&self) -> Result<bool, MutexError>;

    /// Acquire the lock, waiting as long as it takes
    async fn lock(&self) -> Result<(), MutexError>;

    /// Release the lock if this holder owns it
    async fn unlock(&self) -> Result<bool, MutexError>;

    /// Reset the lock's expiry if this holder owns it
    async fn refresh(&self) -> Result<bool, MutexError>;

    /// Whether anyone holds the lock
    async fn is_locked(&self) -> Result<bool, MutexError>;

    /// Whether this holder owns the lock
    async fn is_owned(&self) -> Result<bool, MutexError>;
}

/// A mutex shared by every process that uses the same key on the same store.
///
/// The lock is a single key whose value is the holder's signature, a UUID
/// generated the first time this instance needs it. The key carries an expiry
/// of `timeout`, so a crashed holder blocks others for at most that long.
/// Work that runs longer than `timeout` must call [`refresh`](Self::refresh)
/// or it may lose the lock while still running.
///
/// Cloning copies the key and the signature cell: a clone taken after the
/// signature exists is the same holder, one taken before is a separate one.
///
/// # Examples
///
/// ```rust,ignore
/// use armature_distributed::DistributedMutex;
/// use armature_redis::{RedisConfig, RedisStore, ScriptCaching};
/// use std::sync::Arc;
///
/// let store = Arc::new(ScriptCaching::new(RedisStore::connect(&RedisConfig::from_env().build()).await?));
/// let mutex = DistributedMutex::with_key(store, "scheduler_lock");
///
/// let report = mutex.synchronize(|| async { build_report().await }).await?;
/// ```
pub struct DistributedMutex<S: ?Sized> {
    key: String,
    timeout: Duration,
    poll_interval: Duration,
    signature: OnceCell<String>,
    store: Arc<S>,
}

impl<S: KeyValueStore + ?Sized + 'static> DistributedMutex<S> {
    /// Create a mutex on a fresh random key with default settings.
    pub fn new(store: Arc<S>) -> Self {
        Self::from_config(store, MutexConfig::default())
    }

    /// Create a mutex on a fixed key, shared with other processes.
    pub fn with_key(store: Arc<S>, key: impl Into<String>) -> Self {
        Self::from_config(store, MutexConfig::with_key(key))
    }

    /// Create a mutex from configuration.
    pub fn from_config(store: Arc<S>, config: MutexConfig) -> Self {
        Self {
            key: config.key.unwrap_or_else(random_key),
            timeout: config.timeout,
            poll_interval: config.poll_interval,
            signature: OnceCell::new(),
            store,
        }
    }

    /// Get the lock key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Lifetime of the lock record without a refresh
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Delay between attempts in [`lock`](Self::lock)
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// The store this mutex talks to
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn signature(&self) -> &str {
        self.signature.get_or_init(|| Uuid::new_v4().to_string())
    }

    // EX takes whole seconds and rejects 0; partial seconds round up
    fn ttl_secs(&self) -> u64 {
        let partial = u64::from(self.timeout.subsec_nanos() > 0);
        self.timeout.as_secs().saturating_add(partial).max(1)
    }

    /// Try to acquire the lock with one `SET NX EX`.
    ///
    /// Returns `true` if this call created the lock record.
    pub async fn try_lock(&self) -> Result<bool, MutexError> {
        let acquired = self
            .store
            .set_nx_ex(&self.key, self.signature(), self.ttl_secs())
            .await?;

        if acquired {
            info!("Acquired lock: {} ({}s)", self.key, self.ttl_secs());
        } else {
            debug!("Failed to acquire lock (already held): {}", self.key);
        }

        Ok(acquired)
    }

    /// Acquire the lock, polling until it is free.
    ///
    /// There is no upper bound on the wait; wrap the call in
    /// `tokio::time::timeout` or use [`lock_timeout`](Self::lock_timeout).
    /// Fails with [`MutexError::Deadlock`] if this instance already owns the lock.
    pub async fn lock(&self) -> Result<&Self, MutexError> {
        self.ensure_not_owned().await?;

        while !self.try_lock().await? {
            tokio::time::sleep(self.poll_interval).await;
        }

        Ok(self)
    }

    /// Acquire the lock, giving up after `wait`.
    pub async fn lock_timeout(&self, wait: Duration) -> Result<&Self, MutexError> {
        self.ensure_not_owned().await?;

        let start = Instant::now();

        loop {
            if self.try_lock().await? {
                return Ok(self);
            }

            let waited = start.elapsed();
            if waited >= wait {
                debug!("Gave up waiting for lock {} after {:?}", self.key, waited);
                return Err(MutexError::Timeout {
                    key: self.key.clone(),
                    waited,
                });
            }

            tokio::time::sleep(self.poll_interval.min(wait - waited)).await;
        }
    }

    async fn ensure_not_owned(&self) -> Result<(), MutexError> {
        if self.is_owned().await? {
            warn!("Recursive lock attempt: {}", self.key);
            return Err(MutexError::Deadlock {
                key: self.key.clone(),
            });
        }
        Ok(())
    }

    /// Release the lock if this instance owns it.
    ///
    /// The signature check and the delete run as one server-side script.
    /// Returns `false` if the lock had expired or belongs to someone else.
    pub async fn unlock(&self) -> Result<bool, MutexError> {
        let result = self
            .store
            .eval(COMPARE_AND_DELETE, &[self.key.as_str()], &[self.signature()])
            .await?;

        if result == 1 {
            debug!("Released lock: {}", self.key);
            Ok(true)
        } else {
            warn!("Failed to release lock (not held or expired): {}", self.key);
            Ok(false)
        }
    }

    /// Reset the lock's expiry to `timeout` if this instance still owns it.
    pub async fn refresh(&self) -> Result<bool, MutexError> {
        let ttl = self.ttl_secs().to_string();
        let result = self
            .store
            .eval(COMPARE_AND_EXPIRE, &[self.key.as_str()], &[self.signature(), ttl.as_str()])
            .await?;

        if result == 1 {
            debug!("Refreshed lock: {} ({}s)", self.key, self.ttl_secs());
            Ok(true)
        } else {
            warn!("Failed to refresh lock (not held or expired): {}", self.key);
            Ok(false)
        }
    }

    /// Whether the lock record exists, whoever holds it.
    pub async fn is_locked(&self) -> Result<bool, MutexError> {
        Ok(self.store.get(&self.key).await?.is_some())
    }

    /// Whether the lock record holds this instance's signature.
    pub async fn is_owned(&self) -> Result<bool, MutexError> {
        let current = self.store.get(&self.key).await?;
        Ok(current.as_deref() == Some(self.signature()))
    }

    /// Run `body` while holding the lock.
    ///
    /// The lock is released after `body` completes, whether it returns a value
    /// (including an `Err` of its own) or panics; a panic is resumed after the
    /// release. If the returned future is dropped while `body` runs, release is
    /// spawned onto the current runtime. Nothing is released if acquiring fails.
    pub async fn synchronize<F, Fut, T>(&self, body: F) -> Result<T, MutexError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.lock().await?;

        let mut guard = ReleaseOnDrop::new(self);
        let outcome = AssertUnwindSafe(async move { body().await })
            .catch_unwind()
            .await;
        let released = self.unlock().await;
        guard.disarm();

        match outcome {
            Ok(value) => {
                if !released? {
                    warn!("Lock was lost before synchronize finished: {}", self.key);
                }
                Ok(value)
            }
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl<S: ?Sized> Clone for DistributedMutex<S> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            timeout: self.timeout,
            poll_interval: self.poll_interval,
            signature: self.signature.clone(),
            store: self.store.clone(),
        }
    }
}

impl<S: ?Sized> fmt::Debug for DistributedMutex<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedMutex")
            .field("key", &self.key)
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S: KeyValueStore + ?Sized + 'static> DistributedLock for DistributedMutex<S> {
    fn key(&self) -> &str {
        &self.key
    }

    async fn try_lock(&self) -> Result<bool, MutexError> {
        DistributedMutex::try_lock(self).await
    }

    async fn lock(&self) -> Result<(), MutexError> {
        DistributedMutex::lock(self).await.map(|_| ())
    }

    async fn unlock(&self) -> Result<bool, MutexError> {
        DistributedMutex::unlock(self).await
    }

    async fn refresh(&self) -> Result<bool, MutexError> {
        DistributedMutex::refresh(self).await
    }

    async fn is_locked(&self) -> Result<bool, MutexError> {
        DistributedMutex::is_locked(self).await
    }

    async fn is_owned(&self) -> Result<bool, MutexError> {
        DistributedMutex::is_owned(self).await
    }
}

/// Releases the lock from a spawned task if `synchronize` is cancelled mid-body.
struct ReleaseOnDrop<S: KeyValueStore + ?Sized + 'static> {
    key: String,
    signature: String,
    store: Arc<S>,
    armed: bool,
}

impl<S: KeyValueStore + ?Sized + 'static> ReleaseOnDrop<S> {
    fn new(mutex: &DistributedMutex<S>) -> Self {
        Self {
            key: mutex.key.clone(),
            signature: mutex.signature().to_string(),
            store: mutex.store.clone(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<S: KeyValueStore + ?Sized + 'static> Drop for ReleaseOnDrop<S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to release abandoned lock {}; it will expire", self.key);
            return;
        };

        let key = std::mem::take(&mut self.key);
        let signature = std::mem::take(&mut self.signature);
        let store = self.store.clone();

        handle.spawn(async move {
            match store.eval(COMPARE_AND_DELETE, &[key.as_str()], &[signature.as_str()]).await {
                Ok(1) => debug!("Released abandoned lock: {}", key),
                Ok(_) => {}
                Err(e) => warn!("Failed to release abandoned lock {}: {}", key, e),
            }
        });
    }
}

/// Distributed mutex builder
#[derive(Debug, Default)]
pub struct MutexBuilder {
    config: MutexConfig,
}

impl MutexBuilder {
    /// Create new mutex builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed, shared key
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.config.key = Some(key.into());
        self
    }

    /// Set the lock record lifetime
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the delay between acquisition attempts
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Start from an existing configuration
    pub fn config(mut self, config: MutexConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the mutex
    pub fn build<S: KeyValueStore + ?Sized + 'static>(self, store: Arc<S>) -> DistributedMutex<S> {
        DistributedMutex::from_config(store, self.config)
    }
}

fn random_key() -> String {
    format!("{:032x}", rand::random::<u128>())
}
