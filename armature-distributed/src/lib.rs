//! Distributed Systems Support for Armature
//!
//! This crate provides a distributed mutex: one lock shared by every process
//! that points at the same key on the same Redis-compatible store.
//!
//! ## Features
//!
//! - **Atomic Acquire** - `SET NX EX` creates the lock record and its expiry in one step
//! - **Safe Release** - signature check and delete run as a single server-side script
//! - **TTL Management** - records expire on their own; owners can refresh them
//! - **Scoped Locking** - `synchronize` releases on every exit path
//! - **Recursion Guard** - re-locking an owned mutex fails with a deadlock error
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use armature_distributed::*;
//! use armature_redis::{RedisConfig, RedisStore, ScriptCaching};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Connect to Redis; scripts are sent once and invoked by SHA afterwards
//!     let store = RedisStore::connect(&RedisConfig::from_env().build()).await?;
//!     let store = Arc::new(ScriptCaching::new(store));
//!
//!     // Coordinate across processes with a shared key
//!     let mutex = MutexBuilder::new()
//!         .key("scheduler_lock")
//!         .timeout(Duration::from_secs(120))
//!         .build(store);
//!
//!     // Critical section; the lock is released afterwards, even on error
//!     mutex.synchronize(|| async {
//!         println!("Lock acquired, doing work...");
//!     }).await?;
//!
//!     // Or drive it by hand
//!     if mutex.try_lock().await? {
//!         mutex.refresh().await?;
//!         mutex.unlock().await?;
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod lock;

pub use config::MutexConfig;
pub use lock::{DistributedLock, DistributedMutex, MutexBuilder, MutexError};
