//! ClientRegistry - Fixed-capacity per-client accounting tables
//!
//! ## Responsibilities
//!
//! - Derive a fairness key from the peer address of a connection
//! - Token-bucket rate state per client
//! - In-flight request counts per client
//!
//! ## Design
//!
//! - Bounded: every table is an arena of slots allocated up front, with a
//!   key -> slot index for O(1) lookup
//! - LRU: when full, the least recently seen evictable slot is reassigned
//! - Fail closed: if nothing can be evicted the caller is told "no"

mod concurrency_table;
mod rate_table;
mod slot_table;

pub use concurrency_table::{ActiveClientSlot, ConcurrencyTable};
pub use rate_table::{RateBucket, RateTable, TOKEN_MILLI};
pub use slot_table::{Slot, SlotTable};

use serde::Serialize;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// Opaque per-connection client identity
///
/// Derived from the peer address. Not a credential, only used to group
/// rate and concurrency accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClientKey(u32);

impl ClientKey {
    /// Shared key for peers whose address cannot be determined
    pub const UNKNOWN: ClientKey = ClientKey(0);

    /// Derive the key from an IP address
    ///
    /// IPv4 (and IPv4-mapped IPv6) uses the address bits directly; other
    /// IPv6 addresses are folded to 32 bits with FNV-1a.
    pub fn from_ip(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Self(u32::from_be_bytes(v4.octets())),
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => Self(u32::from_be_bytes(v4.octets())),
                None => {
                    let hash = v6.octets().iter().fold(FNV_OFFSET_BASIS, |h, b| {
                        (h ^ u32::from(*b)).wrapping_mul(FNV_PRIME)
                    });
                    Self(hash)
                }
            },
        }
    }

    /// Derive the key from an optional peer socket address
    pub fn from_peer(peer: Option<SocketAddr>) -> Self {
        peer.map(|addr| Self::from_ip(addr.ip()))
            .unwrap_or(Self::UNKNOWN)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl From<u32> for ClientKey {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}
