//! # layercache
//!
//! Concurrent in-process object cache.
//!
//! ## Architecture
//! - **Buckets**: `2^n` shards, each a hash map behind its own `RwLock`
//! - **Worker**: one background thread per cache owns the recency list and
//!   the aggregate size; readers and writers talk to it over channels
//! - **Promotion**: sampled, one message every `gets_per_promote` hits
//! - **Layered keys**: `(group, key)` addressing with O(1) group removal
//! - **Pinning**: tracked references exempt an entry from eviction
//!
//! ```no_run
//! use std::time::Duration;
//! use layercache::{Cache, Configuration};
//!
//! let cache = Cache::new(Configuration::new().max_size(1000));
//! cache.set("user:4", "leto".to_string(), Duration::from_secs(60));
//! if let Some(item) = cache.get("user:4") {
//!     assert_eq!(item.value(), "leto");
//! }
//! ```

#![warn(missing_docs)]

mod bucket;
mod cache;
mod config;
mod engine;
mod error;
mod item;
mod layered;
mod list;
mod secondary;
mod stats;
mod worker;

pub use cache::Cache;
pub use config::{Configuration, OnDelete, Sizer, DEFAULT_BUCKETS, MAX_BUCKETS};
pub use error::{Error, Result};
pub use item::{Item, Sizeable, TrackedItem};
pub use layered::LayeredCache;
pub use secondary::SecondaryCache;
pub use stats::CacheStats;
