//! # Curator Cache
//!
//! Two-tier response cache for the curator metadata client.
//!
//! A bounded in-memory LRU tier fronts a persistent on-disk store. Reads
//! check memory first, fall back to disk, and promote disk hits back into
//! memory. Writes go through to both tiers. Every entry carries a TTL and
//! a `negative` flag so that known-absent lookups can be cached for much
//! longer than positive results.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`entry`] | Cache record type and freshness rules |
//! | [`memory`] | Bounded LRU memory tier |
//! | [`disk`] | Persistent key-to-record JSON store |
//! | [`tiered`] | Composite write-through cache |
//! | [`error`] | Cache error type |

pub mod disk;
pub mod entry;
pub mod error;
pub mod memory;
pub mod tiered;

pub use disk::DiskTier;
pub use entry::{now_unix, CacheRecord};
pub use error::CacheError;
pub use memory::LruTier;
pub use tiered::{CacheMode, Lookup, TieredCache};
