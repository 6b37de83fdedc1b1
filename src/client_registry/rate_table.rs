//! Token-bucket rate state per client

use super::{ClientKey, SlotTable};
use crate::error::Result;

/// One token in milli-units
pub const TOKEN_MILLI: i64 = 1000;

/// Token bucket state for one client
///
/// Tokens are fixed-point milli-units so refills below one whole token per
/// millisecond are not lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBucket {
    /// Current tokens (milli), always within `0..=burst_milli`
    pub tokens_milli: i64,
    /// Last refill time (ms)
    pub last_refill_ms: i64,
}

/// Per-client token buckets, bounded with LRU eviction
#[derive(Debug)]
pub struct RateTable {
    slots: SlotTable<RateBucket>,
    /// Tokens per second; equal to milli-tokens per millisecond
    rate_per_sec: i64,
    burst_milli: i64,
}

impl RateTable {
    pub fn new(capacity: usize, rate_per_sec: u32, burst: u32) -> Result<Self> {
        Ok(Self {
            slots: SlotTable::try_with_capacity(capacity)?,
            rate_per_sec: i64::from(rate_per_sec),
            burst_milli: i64::from(burst) * TOKEN_MILLI,
        })
    }

    /// Check and spend one token for `key`
    ///
    /// Unknown keys get a full bucket. Eviction picks the oldest
    /// `last_seen` regardless of token level. `last_seen` is refreshed on
    /// every call, accepted or not.
    pub fn check(&mut self, key: ClientKey, now_ms: i64) -> bool {
        let burst_milli = self.burst_milli;
        let rate = self.rate_per_sec;

        let Some(slot) = self.slots.get_or_insert_with(
            key,
            now_ms,
            |_| true,
            || RateBucket {
                tokens_milli: burst_milli,
                last_refill_ms: now_ms,
            },
        ) else {
            return false;
        };

        slot.last_seen_ms = now_ms;
        let bucket = &mut slot.value;

        let elapsed_ms = now_ms - bucket.last_refill_ms;
        if elapsed_ms > 0 {
            bucket.tokens_milli = bucket
                .tokens_milli
                .saturating_add(elapsed_ms.saturating_mul(rate))
                .min(burst_milli);
            bucket.last_refill_ms = now_ms;
        }

        if bucket.tokens_milli < TOKEN_MILLI {
            return false;
        }
        bucket.tokens_milli -= TOKEN_MILLI;
        true
    }

    /// Current tokens for `key` (milli), if tracked
    pub fn tokens_milli(&self, key: ClientKey) -> Option<i64> {
        self.slots.get(key).map(|slot| slot.value.tokens_milli)
    }

    pub fn burst_milli(&self) -> i64 {
        self.burst_milli
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

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }
}
