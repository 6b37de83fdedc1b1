//! In-flight request counts per client

use super::{ClientKey, SlotTable};
use crate::error::Result;

/// In-flight state for one client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveClientSlot {
    pub in_flight: u32,
}

/// Per-client concurrency table
///
/// Same lazy-create / LRU policy as the rate table, except that a slot
/// with in-flight work is never evicted.
#[derive(Debug)]
pub struct ConcurrencyTable {
    slots: SlotTable<ActiveClientSlot>,
}

impl ConcurrencyTable {
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            slots: SlotTable::try_with_capacity(capacity)?,
        })
    }

    /// Reserve one in-flight slot for `key` if it is below `limit`
    pub fn try_acquire(&mut self, key: ClientKey, limit: u32, now_ms: i64) -> bool {
        let capacity = self.slots.capacity();
        let Some(slot) = self.slots.get_or_insert_with(
            key,
            now_ms,
            |active| active.in_flight == 0,
            ActiveClientSlot::default,
        ) else {
            tracing::warn!(
                client = %key,
                capacity = capacity,
                "Client table full with in-flight work, rejecting"
            );
            return false;
        };

        slot.last_seen_ms = now_ms;
        if slot.value.in_flight >= limit {
            return false;
        }
        slot.value.in_flight += 1;
        true
    }

    /// Give back one in-flight slot for `key` (floor 0)
    pub fn release(&mut self, key: ClientKey, now_ms: i64) {
        if let Some(slot) = self.slots.get_mut(key) {
            slot.value.in_flight = slot.value.in_flight.saturating_sub(1);
            slot.last_seen_ms = now_ms;
        }
    }

    pub fn in_flight(&self, key: ClientKey) -> u32 {
        self.slots
            .get(key)
            .map(|slot| slot.value.in_flight)
            .unwrap_or(0)
    }

    /// Sum of in-flight counts across tracked clients
    pub fn total_in_flight(&self) -> u32 {
        self.slots.iter().map(|slot| slot.value.in_flight).sum()
    }

    pub fn contains(&self, key: ClientKey) -> bool {
        self.slots.contains(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
