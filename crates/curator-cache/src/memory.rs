//! Bounded LRU memory tier.

use std::collections::HashMap;

use crate::entry::{now_unix, CacheRecord};

#[derive(Debug)]
struct Slot {
    record: CacheRecord,
    last_used: u64,
}

/// Least-recently-used map holding a bounded subset of the disk tier.
///
/// Recency is tracked with a monotonic tick rather than timestamps so
/// that two touches in the same instant still have a total order. Not
/// internally synchronized; [`crate::TieredCache`] wraps it in a mutex.
#[derive(Debug)]
pub struct LruTier {
    capacity: usize,
    tick: u64,
    slots: HashMap<String, Slot>,
}

impl LruTier {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tick: 0,
            slots: HashMap::new(),
        }
    }

    fn bump(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Fetch a fresh record, marking it most recently used.
    /// Expired records are dropped on access.
    pub fn get(&mut self, key: &str) -> Option<CacheRecord> {
        let now = now_unix();
        match self.slots.get(key) {
            Some(slot) if slot.record.is_fresh_at(now) => {
                let tick = self.bump();
                let slot = self.slots.get_mut(key).expect("slot checked above");
                slot.last_used = tick;
                Some(slot.record.clone())
            }
            Some(_) => {
                self.slots.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert or replace a record, evicting least-recently-used slots
    /// while over capacity.
    pub fn insert(&mut self, record: CacheRecord) {
        if self.capacity == 0 {
            return;
        }
        let tick = self.bump();
        self.slots
            .insert(record.key.clone(), Slot { record, last_used: tick });

        while self.slots.len() > self.capacity {
            let oldest = self
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    self.slots.remove(&key);
                }
                None => break,
            }
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.slots.remove(key);
    }

    /// Drop every negative record, keeping positives untouched.
    pub fn drop_negative(&mut self) {
        self.slots.retain(|_, slot| !slot.record.negative);
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
