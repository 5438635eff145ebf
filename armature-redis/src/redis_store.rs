//! Redis-backed store.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Cmd, FromRedisValue};
use std::time::Duration;
use tracing::{debug, info};

use crate::store::{Command, KeyValueStore};
use crate::{RedisConfig, Result, StoreError};

/// [`KeyValueStore`] over a Redis connection manager.
///
/// Cloning is cheap; clones share the underlying multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    command_timeout: Duration,
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use armature_redis::{RedisConfig, RedisStore};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), armature_redis::StoreError> {
    ///     let config = RedisConfig::from_env().build();
    ///     let store = RedisStore::connect(&config).await?;
    ///     store.health_check().await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        config.validate()?;

        let client = Client::open(config.connection_url())
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let connection = tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout)?
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let host = url::Url::parse(&config.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        info!(host = %host, database = ?config.database, "Redis store connected");

        Ok(Self {
            connection,
            command_timeout: config.command_timeout,
        })
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(connection: ConnectionManager, command_timeout: Duration) -> Self {
        Self {
            connection,
            command_timeout,
        }
    }

    /// Get the underlying connection manager.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Check if the connection is healthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: String = self.query(&redis::cmd("PING")).await?;
        Ok(())
    }

    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T> {
        let mut conn = self.connection.clone();
        let value = tokio::time::timeout(self.command_timeout, cmd.query_async(&mut conn))
            .await
            .map_err(|_| StoreError::Timeout)??;
        Ok(value)
    }

    fn script_cmd(name: &str, script_or_sha: &str, keys: &[&str], args: &[&str]) -> Cmd {
        let mut cmd = redis::cmd(name);
        cmd.arg(script_or_sha).arg(keys.len()).arg(keys).arg(args);
        cmd
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX").arg("EX").arg(ttl_secs);

        let reply: Option<String> = self.query(&cmd).await?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    async fn del(&self, key: &str) -> Result<u64> {
        self.query(redis::cmd("DEL").arg(key)).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let seconds: i64 = self.query(redis::cmd("TTL").arg(key)).await?;

        // -2: missing key, -1: no expiry
        if seconds < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_secs(seconds as u64)))
        }
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let updated: i64 = self.query(redis::cmd("EXPIRE").arg(key).arg(ttl_secs)).await?;
        Ok(updated == 1)
    }

    async fn eval(&self, script: &str, keys: &[&str], args: &[&str]) -> Result<i64> {
        self.query(&Self::script_cmd("EVAL", script, keys, args)).await
    }

    async fn script_load(&self, script: &str) -> Result<String> {
        let sha: String = self.query(redis::cmd("SCRIPT").arg("LOAD").arg(script)).await?;
        debug!(sha = %sha, "Loaded script into Redis");
        Ok(sha)
    }

    async fn evalsha(&self, sha: &str, keys: &[&str], args: &[&str]) -> Result<i64> {
        match self.query(&Self::script_cmd("EVALSHA", sha, keys, args)).await {
            Err(StoreError::Redis(err)) if err.code() == Some("NOSCRIPT") => {
                Err(StoreError::NoScript(sha.to_string()))
            }
            other => other,
        }
    }

    fn supports(&self, _command: Command) -> bool {
        true
    }
}
