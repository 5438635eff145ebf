//! Script-caching store decorator.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::store::{Command, KeyValueStore};
use crate::Result;

/// Wraps a [`KeyValueStore`] so that `eval` sends each distinct script only once.
///
/// The first `eval` of a script loads it with `SCRIPT LOAD` and caches the
/// returned handle; every `eval` then runs as `EVALSHA`. All other commands go
/// straight to the wrapped store.
///
/// A handle that the server has since evicted (`SCRIPT FLUSH`, restart) is not
/// reloaded; the call fails with [`crate::StoreError::NoScript`].
///
/// ```rust,ignore
/// use armature_redis::{RedisConfig, RedisStore, ScriptCaching};
///
/// let store = ScriptCaching::new(RedisStore::connect(&RedisConfig::default()).await?);
/// let released = store.eval(armature_redis::scripts::COMPARE_AND_DELETE, &["job"], &[&token]).await?;
/// ```
pub struct ScriptCaching<S> {
    inner: S,
    handles: RwLock<HashMap<String, Arc<OnceCell<String>>>>,
}

impl<S: KeyValueStore> ScriptCaching<S> {
    /// Wrap a store.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Unwrap, discarding cached handles.
    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Number of scripts with a cached handle.
    pub fn cached_scripts(&self) -> usize {
        self.handles
            .read()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    fn slot(&self, script: &str) -> Arc<OnceCell<String>> {
        if let Some(cell) = self.handles.read().get(script) {
            return cell.clone();
        }
        self.handles
            .write()
            .entry(script.to_string())
            .or_default()
            .clone()
    }

    async fn handle_for(&self, script: &str) -> Result<String> {
        let slot = self.slot(script);
        let inner = &self.inner;
        let sha = slot
            .get_or_try_init(move || async move {
                let sha = inner.script_load(script).await?;
                debug!(sha = %sha, "Cached script handle");
                Ok::<_, crate::StoreError>(sha)
            })
            .await?;
        Ok(sha.clone())
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for ScriptCaching<S> {
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        self.inner.set_nx_ex(key, value, ttl_secs).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn del(&self, key: &str) -> Result<u64> {
        self.inner.del(key).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.inner.ttl(key).await
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        self.inner.expire(key, ttl_secs).await
    }

    async fn eval(&self, script: &str, keys: &[&str], args: &[&str]) -> Result<i64> {
        let sha = self.handle_for(script).await?;
        self.inner.evalsha(&sha, keys, args).await
    }

    async fn script_load(&self, script: &str) -> Result<String> {
        self.inner.script_load(script).await
    }

    async fn evalsha(&self, sha: &str, keys: &[&str], args: &[&str]) -> Result<i64> {
        self.inner.evalsha(sha, keys, args).await
    }

    fn supports(&self, command: Command) -> bool {
        self.inner.supports(command)
    }
}
