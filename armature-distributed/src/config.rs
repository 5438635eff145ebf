//! Mutex configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default lifetime of a lock record without renewal.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default delay between acquisition attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Settings for a [`crate::DistributedMutex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutexConfig {
    /// Shared lock key. `None` picks a random key per mutex.
    #[serde(default)]
    pub key: Option<String>,

    /// Lock record lifetime, in seconds when serialized.
    #[serde(with = "duration_secs", default = "default_timeout")]
    pub timeout: Duration,

    /// Delay between attempts in `lock()`, in milliseconds when serialized.
    #[serde(with = "duration_millis", default = "default_poll_interval")]
    pub poll_interval: Duration,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

impl Default for MutexConfig {
    fn default() -> Self {
        Self {
            key: None,
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl MutexConfig {
    /// Configuration for a fixed, shared key.
    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Reads `ARMATURE_MUTEX_KEY`, `ARMATURE_MUTEX_TIMEOUT` (seconds) and
    /// `ARMATURE_MUTEX_POLL_INTERVAL_MS`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(key) = lookup("ARMATURE_MUTEX_KEY") {
            config.key = Some(key);
        }

        if let Some(timeout) = lookup("ARMATURE_MUTEX_TIMEOUT")
            && let Ok(secs) = timeout.parse() {
                config.timeout = Duration::from_secs(secs);
            }

        if let Some(interval) = lookup("ARMATURE_MUTEX_POLL_INTERVAL_MS")
            && let Ok(millis) = interval.parse() {
                config.poll_interval = Duration::from_millis(millis);
            }

        config
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

mod duration_millis {
    use serde::{ser, Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        u64::try_from(duration.as_millis())
            .map_err(|_| <S::Error as ser::Error>::custom("poll interval does not fit in u64 milliseconds"))?
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = MutexConfig::default();
        assert_eq!(config.key, None);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("ARMATURE_MUTEX_KEY", "scheduler_lock"),
            ("ARMATURE_MUTEX_TIMEOUT", "120"),
            ("ARMATURE_MUTEX_POLL_INTERVAL_MS", "not-a-number"),
        ]);

        let config = MutexConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.key.as_deref(), Some("scheduler_lock"));
        assert_eq!(config.timeout, Duration::from_secs(120));
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn test_deserialize() {
        let config: MutexConfig =
            serde_json::from_str(r#"{ "key": "job_lock", "poll_interval": 250 }"#).unwrap();

        assert_eq!(config, MutexConfig {
            key: Some("job_lock".to_string()),
            timeout: DEFAULT_TIMEOUT,
            poll_interval: Duration::from_millis(250),
        });
    }

    #[test]
    fn test_serialize_poll_interval() {
        let config = MutexConfig {
            poll_interval: Duration::from_millis(250),
            ..MutexConfig::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["poll_interval"], 250);
        assert_eq!(json["timeout"], 60);

        let oversized = MutexConfig {
            poll_interval: Duration::MAX,
            ..MutexConfig::default()
        };
        assert!(serde_json::to_string(&oversized).is_err());
    }
}
