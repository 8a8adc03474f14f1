//! Composite write-through cache: memory LRU over the disk store.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use crate::disk::DiskTier;
use crate::entry::CacheRecord;
use crate::error::CacheError;
use crate::memory::LruTier;

/// Defines how a fetch interacts with the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Read from the cache when a fresh entry is present; otherwise
    /// fetch and write the response through. (Default)
    #[default]
    Use,
    /// Always fetch, bypassing cached entries, but still write the new
    /// response through (force refresh).
    Refresh,
    /// Always fetch and neither read from nor write to the cache.
    Bypass,
}

/// Outcome of a cache read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// A cached upstream payload.
    Positive(Value),
    /// A cached "the upstream has no record for this key" result.
    Negative,
}

/// Thread-safe two-tier cache.
///
/// Reads consult the memory LRU first and fall back to the disk tier,
/// promoting disk hits into memory. Writes go through to both tiers.
/// Memory eviction never touches disk.
#[derive(Debug)]
pub struct TieredCache {
    memory: Mutex<LruTier>,
    disk: DiskTier,
}

impl TieredCache {
    pub fn open(memory_capacity: usize, dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        Ok(Self {
            memory: Mutex::new(LruTier::new(memory_capacity)),
            disk: DiskTier::open(dir)?,
        })
    }

    /// Look up a fresh entry for `key`.
    pub fn get(&self, key: &str) -> Option<Lookup> {
        {
            let mut memory = self.memory.lock().expect("memory tier lock not poisoned");
            if let Some(record) = memory.get(key) {
                return Some(Self::lookup_of(record));
            }
        }

        let record = self.disk.read(key)?;
        let lookup = Self::lookup_of(record.clone());
        self.memory
            .lock()
            .expect("memory tier lock not poisoned")
            .insert(record);
        Some(lookup)
    }

    /// Write-through insert. `negative` marks a known-absent result.
    pub fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Duration,
        negative: bool,
    ) -> Result<(), CacheError> {
        let record = CacheRecord::new(key, value, ttl, negative);
        self.disk.write(&record)?;
        self.memory
            .lock()
            .expect("memory tier lock not poisoned")
            .insert(record);
        Ok(())
    }

    /// Remove one key from both tiers.
    pub fn invalidate(&self, key: &str) {
        self.memory
            .lock()
            .expect("memory tier lock not poisoned")
            .remove(key);
        self.disk.remove(key);
    }

    /// Drop every negative entry from both tiers.
    pub fn clear_negative(&self) -> usize {
        self.memory
            .lock()
            .expect("memory tier lock not poisoned")
            .drop_negative();
        self.disk.clear_negative()
    }

    /// Drop everything from both tiers.
    pub fn clear(&self) {
        self.memory
            .lock()
            .expect("memory tier lock not poisoned")
            .clear();
        self.disk.clear();
    }

    pub fn memory_len(&self) -> usize {
        self.memory
            .lock()
            .expect("memory tier lock not poisoned")
            .len()
    }

    /// True if `key` is currently resident in the memory tier.
    pub fn memory_contains(&self, key: &str) -> bool {
        self.memory
            .lock()
            .expect("memory tier lock not poisoned")
            .contains(key)
    }

    pub fn disk_len(&self) -> usize {
        self.disk.entry_count()
    }

    fn lookup_of(record: CacheRecord) -> Lookup {
        if record.negative {
            Lookup::Negative
        } else {
            Lookup::Positive(record.value)
        }
    }
}
