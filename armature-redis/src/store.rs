//! Store capability trait.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::Result;

/// A store command, used to probe what a [`KeyValueStore`] can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// `SET key value NX EX seconds`
    SetNxEx,
    /// `GET key`
    Get,
    /// `DEL key`
    Del,
    /// `TTL key`
    Ttl,
    /// `EXPIRE key seconds`
    Expire,
    /// `EVAL script numkeys key... arg...`
    Eval,
    /// `SCRIPT LOAD script`
    ScriptLoad,
    /// `EVALSHA sha numkeys key... arg...`
    EvalSha,
}

impl Command {
    /// All commands of the capability interface.
    pub const ALL: [Command; 8] = [
        Command::SetNxEx,
        Command::Get,
        Command::Del,
        Command::Ttl,
        Command::Expire,
        Command::Eval,
        Command::ScriptLoad,
        Command::EvalSha,
    ];
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::SetNxEx => "SET NX EX",
            Command::Get => "GET",
            Command::Del => "DEL",
            Command::Ttl => "TTL",
            Command::Expire => "EXPIRE",
            Command::Eval => "EVAL",
            Command::ScriptLoad => "SCRIPT LOAD",
            Command::EvalSha => "EVALSHA",
        };
        f.write_str(name)
    }
}

/// The minimal key-value surface the distributed primitives need.
///
/// Every method maps onto a single store round-trip, so each call is atomic
/// with respect to other clients of the same store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Set `key` to `value` with an expiry of `ttl_secs`, only if `key` is absent.
    ///
    /// Returns `true` if the key was created by this call.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool>;

    /// Get the value at `key`, or `None` if it does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Delete `key`, returning the number of keys removed.
    async fn del(&self, key: &str) -> Result<u64>;

    /// Remaining time to live of `key`.
    ///
    /// Returns `None` if the key does not exist or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Set the expiry of an existing key. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool>;

    /// Evaluate a server-side script that returns an integer.
    async fn eval(&self, script: &str, keys: &[&str], args: &[&str]) -> Result<i64>;

    /// Load a script into the store's script cache and return its handle.
    async fn script_load(&self, script: &str) -> Result<String>;

    /// Evaluate a previously loaded script by handle.
    async fn evalsha(&self, sha: &str, keys: &[&str], args: &[&str]) -> Result<i64>;

    /// Whether this store can execute `command`.
    fn supports(&self, command: Command) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_display() {
        assert_eq!(Command::SetNxEx.to_string(), "SET NX EX");
        assert_eq!(Command::EvalSha.to_string(), "EVALSHA");
    }

    #[test]
    fn test_all_commands_distinct() {
        let unique: std::collections::HashSet<_> = Command::ALL.iter().collect();
        assert_eq!(unique.len(), Command::ALL.len());
    }
}
