//! # Armature Redis
//!
//! Key-value store access for Armature's distributed primitives.
//!
//! ## Features
//!
//! - **Store Trait**: [`KeyValueStore`], the minimal command surface the
//!   distributed lock needs, each method one atomic store round-trip
//! - **Redis Backend**: [`RedisStore`] over a reconnecting connection manager
//! - **In-Memory Backend**: [`MemoryStore`] for tests and single-node setups
//! - **Script Caching**: [`ScriptCaching`] loads each Lua script once and
//!   invokes it by SHA afterwards
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use armature_redis::{KeyValueStore, RedisConfig, RedisStore, ScriptCaching};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RedisConfig::builder()
//!         .url("redis://localhost:6379")
//!         .database(2)
//!         .build();
//!
//!     let store = ScriptCaching::new(RedisStore::connect(&config).await?);
//!
//!     if store.set_nx_ex("reports:nightly", "worker-1", 60).await? {
//!         println!("claimed");
//!     }
//!
//!     Ok(())
//! }
//! ```

mod caching;
mod config;
mod error;
mod memory;
mod redis_store;
pub mod scripts;
mod store;

pub use caching::ScriptCaching;
pub use config::{RedisConfig, RedisConfigBuilder};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use store::{Command, KeyValueStore};

// Re-export redis crate for convenience
pub use redis;

/// Prelude for common imports.
///
/// ```
/// use armature_redis::prelude::*;
/// ```
pub mod prelude {
    pub use crate::caching::ScriptCaching;
    pub use crate::config::{RedisConfig, RedisConfigBuilder};
    pub use crate::error::{Result, StoreError};
    pub use crate::memory::MemoryStore;
    pub use crate::redis_store::RedisStore;
    pub use crate::store::{Command, KeyValueStore};
}
