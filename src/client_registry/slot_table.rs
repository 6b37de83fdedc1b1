//! Fixed-capacity slot arena with recency eviction

use super::ClientKey;
use crate::error::{Error, Result};
use std::collections::HashMap;

/// One occupied slot
#[derive(Debug, Clone)]
pub struct Slot<T> {
    pub key: ClientKey,
    /// Last time this key touched the table (ms, guard clock)
    pub last_seen_ms: i64,
    pub value: T,
}

/// Arena of `capacity` slots plus a key -> slot index
///
/// Storage for the full capacity is reserved once and never grows. Slots
/// fill in order and are only ever reassigned, never freed.
#[derive(Debug)]
pub struct SlotTable<T> {
    slots: Vec<Slot<T>>,
    index: HashMap<ClientKey, usize>,
    capacity: usize,
}

impl<T> SlotTable<T> {
    /// Reserve storage for `capacity` slots
    ///
    /// Fails with `Error::Unavailable` when the allocation cannot be made.
    pub fn try_with_capacity(capacity: usize) -> Result<Self> {
        let unavailable = |e: std::collections::TryReserveError| {
            Error::Unavailable(format!(
                "cannot reserve {} client slots: {}",
                capacity, e
            ))
        };

        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity).map_err(unavailable)?;
        let mut index = HashMap::new();
        index.try_reserve(capacity).map_err(unavailable)?;

        Ok(Self {
            slots,
            index,
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: ClientKey) -> bool {
        self.index.contains_key(&key)
    }

    pub fn get(&self, key: ClientKey) -> Option<&Slot<T>> {
        let idx = *self.index.get(&key)?;
        self.slots.get(idx)
    }

    pub fn get_mut(&mut self, key: ClientKey) -> Option<&mut Slot<T>> {
        let idx = *self.index.get(&key)?;
        self.slots.get_mut(idx)
    }

    /// Locate the slot for `key`, creating it if needed
    ///
    /// Creation takes a free slot when one exists, otherwise reassigns the
    /// evictable slot with the oldest `last_seen_ms`. Returns `None` when
    /// the table is full and `evictable` rejects every occupant.
    pub fn get_or_insert_with<E, F>(
        &mut self,
        key: ClientKey,
        now_ms: i64,
        evictable: E,
        init: F,
    ) -> Option<&mut Slot<T>>
    where
        E: Fn(&T) -> bool,
        F: FnOnce() -> T,
    {
        if let Some(&idx) = self.index.get(&key) {
            return self.slots.get_mut(idx);
        }

        let slot = Slot {
            key,
            last_seen_ms: now_ms,
            value: init(),
        };

        if self.slots.len() < self.capacity {
            let idx = self.slots.len();
            self.slots.push(slot);
            self.index.insert(key, idx);
            return self.slots.get_mut(idx);
        }

        let victim = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| evictable(&s.value))
            .min_by_key(|(_, s)| s.last_seen_ms)
            .map(|(i, _)| i)?;

        let old = std::mem::replace(&mut self.slots[victim], slot);
        self.index.remove(&old.key);
        self.index.insert(key, victim);
        tracing::debug!(
            evicted = %old.key,
            replacement = %key,
            last_seen_ms = old.last_seen_ms,
            "Client slot evicted"
        );
        self.slots.get_mut(victim)
    }

    /// Iterate occupied slots in arena order
    pub fn iter(&self) -> impl Iterator<Item = &Slot<T>> {
        self.slots.iter()
    }
}
