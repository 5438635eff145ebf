//! In-process store.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::scripts::{self, COMPARE_AND_DELETE, COMPARE_AND_EXPIRE};
use crate::store::{Command, KeyValueStore};
use crate::{Result, StoreError};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    scripts: HashMap<String, String>,
}

/// Expiry instant `ttl_secs` from now; out-of-range values fail as Redis does.
fn deadline(ttl_secs: u64) -> Result<Instant> {
    Instant::now()
        .checked_add(Duration::from_secs(ttl_secs))
        .ok_or_else(|| StoreError::Command(format!("invalid expire time: {ttl_secs}")))
}

impl State {
    /// Look up a live entry, evicting it first if it has expired.
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn run_script(&mut self, script: &str, keys: &[&str], args: &[&str]) -> Result<i64> {
        let key = keys
            .first()
            .ok_or_else(|| StoreError::Command("script expects one key".to_string()))?;
        let expected = args
            .first()
            .ok_or_else(|| StoreError::Command("script expects a value argument".to_string()))?;

        let matches = self.live(key).is_some_and(|e| e.value == *expected);

        match script {
            COMPARE_AND_DELETE => {
                if matches {
                    self.entries.remove(*key);
                }
                Ok(matches as i64)
            }
            COMPARE_AND_EXPIRE => {
                let secs: u64 = args
                    .get(1)
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| StoreError::Command("invalid expire time".to_string()))?;
                if let Some(entry) = self.live(key).filter(|_| matches) {
                    entry.expires_at = Some(deadline(secs)?);
                }
                Ok(matches as i64)
            }
            _ => Err(StoreError::Command(format!(
                "script {} cannot be evaluated in memory",
                scripts::script_hash(script)
            ))),
        }
    }
}

/// A [`KeyValueStore`] held in process memory.
///
/// Expiry follows tokio's clock, so tests can drive it with
/// `tokio::time::pause` and `tokio::time::advance`. Only the scripts in
/// [`crate::scripts`] can be evaluated. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.state
            .lock()
            .entries
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every key and loaded script.
    pub fn flush(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.scripts.clear();
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        if ttl_secs == 0 {
            return Err(StoreError::Command("invalid expire time in 'set' command".to_string()));
        }

        let expires_at = deadline(ttl_secs)?;
        let mut state = self.state.lock();
        if state.live(key).is_some() {
            return Ok(false);
        }

        state.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(expires_at),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state.lock().live(key).map(|e| e.value.clone()))
    }

    async fn del(&self, key: &str) -> Result<u64> {
        let mut state = self.state.lock();
        let existed = state.live(key).is_some();
        state.entries.remove(key);
        Ok(existed as u64)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut state = self.state.lock();
        let now = Instant::now();
        Ok(state
            .live(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let mut state = self.state.lock();
        match state.live(key) {
            Some(entry) => {
                entry.expires_at = Some(deadline(ttl_secs)?);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn eval(&self, script: &str, keys: &[&str], args: &[&str]) -> Result<i64> {
        self.state.lock().run_script(script, keys, args)
    }

    async fn script_load(&self, script: &str) -> Result<String> {
        let sha = scripts::script_hash(script);
        self.state
            .lock()
            .scripts
            .insert(sha.clone(), script.to_string());
        Ok(sha)
    }

    async fn evalsha(&self, sha: &str, keys: &[&str], args: &[&str]) -> Result<i64> {
        let mut state = self.state.lock();
        let script = state
            .scripts
            .get(sha)
            .cloned()
            .ok_or_else(|| StoreError::NoScript(sha.to_string()))?;
        state.run_script(&script, keys, args)
    }

    fn supports(&self, _command: Command) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_nx_ex_only_when_absent() {
        let store = MemoryStore::new();

        assert!(store.set_nx_ex("k", "a", 10).await.unwrap());
        assert!(!store.set_nx_ex("k", "b", 10).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("a".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_ttl_rejected() {
        let store = MemoryStore::new();

        let err = store.set_nx_ex("k", "a", u64::MAX).await.unwrap_err();
        assert!(matches!(err, StoreError::Command(_)));
        assert!(store.is_empty());

        store.set_nx_ex("k", "a", 10).await.unwrap();
        assert!(matches!(store.expire("k", u64::MAX).await, Err(StoreError::Command(_))));

        let ttl = u64::MAX.to_string();
        let err = store.eval(COMPARE_AND_EXPIRE, &["k"], &["a", &ttl]).await.unwrap_err();
        assert!(matches!(err, StoreError::Command(_)));
        assert_eq!(store.ttl("k").await.unwrap(), Some(Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected() {
        let store = MemoryStore::new();
        assert!(store.set_nx_ex("k", "a", 0).await.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let store = MemoryStore::new();
        store.set_nx_ex("k", "a", 5).await.unwrap();

        assert_eq!(store.ttl("k").await.unwrap(), Some(Duration::from_secs(5)));

        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), None);
        assert!(store.set_nx_ex("k", "b", 5).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_resets_ttl() {
        let store = MemoryStore::new();
        store.set_nx_ex("k", "a", 60).await.unwrap();

        assert!(store.expire("k", 10).await.unwrap());
        assert_eq!(store.ttl("k").await.unwrap(), Some(Duration::from_secs(10)));
        assert!(!store.expire("missing", 10).await.unwrap());
    }

    #[tokio::test]
    async fn test_del_counts_removed_keys() {
        let store = MemoryStore::new();
        store.set_nx_ex("k", "a", 10).await.unwrap();

        assert_eq!(store.del("k").await.unwrap(), 1);
        assert_eq!(store.del("k").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_compare_and_delete() {
        let store = MemoryStore::new();
        store.set_nx_ex("k", "owner", 10).await.unwrap();

        assert_eq!(store.eval(COMPARE_AND_DELETE, &["k"], &["other"]).await.unwrap(), 0);
        assert_eq!(store.get("k").await.unwrap(), Some("owner".to_string()));

        assert_eq!(store.eval(COMPARE_AND_DELETE, &["k"], &["owner"]).await.unwrap(), 1);
        assert_eq!(store.get("k").await.unwrap(), None);

        assert_eq!(store.eval(COMPARE_AND_DELETE, &["k"], &["owner"]).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_compare_and_expire() {
        let store = MemoryStore::new();
        store.set_nx_ex("k", "owner", 60).await.unwrap();
        store.expire("k", 5).await.unwrap();

        assert_eq!(
            store.eval(COMPARE_AND_EXPIRE, &["k"], &["other", "60"]).await.unwrap(),
            0
        );
        assert_eq!(store.ttl("k").await.unwrap(), Some(Duration::from_secs(5)));

        assert_eq!(
            store.eval(COMPARE_AND_EXPIRE, &["k"], &["owner", "60"]).await.unwrap(),
            1
        );
        assert_eq!(store.ttl("k").await.unwrap(), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_unknown_script_is_rejected() {
        let store = MemoryStore::new();
        let err = store.eval("return 1", &["k"], &["v"]).await.unwrap_err();
        assert!(matches!(err, StoreError::Command(_)));
    }

    #[tokio::test]
    async fn test_evalsha_requires_loaded_script() {
        let store = MemoryStore::new();
        store.set_nx_ex("k", "owner", 10).await.unwrap();

        let sha = scripts::script_hash(COMPARE_AND_DELETE);
        let err = store.evalsha(&sha, &["k"], &["owner"]).await.unwrap_err();
        assert!(matches!(err, StoreError::NoScript(_)));

        let loaded = store.script_load(COMPARE_AND_DELETE).await.unwrap();
        assert_eq!(loaded, sha);
        assert_eq!(store.evalsha(&sha, &["k"], &["owner"]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_flush_clears_everything() {
        let store = MemoryStore::new();
        store.set_nx_ex("k", "v", 10).await.unwrap();
        let sha = store.script_load(COMPARE_AND_DELETE).await.unwrap();

        store.flush();

        assert!(store.is_empty());
        assert!(store.evalsha(&sha, &["k"], &["v"]).await.is_err());
    }
}
