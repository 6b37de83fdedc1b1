//! Shared API models
//!
//! Response shapes used by the web layer.

use crate::admission_guard::GuardStats;
use crate::entity_store::StoreCounts;
use serde::{Deserialize, Serialize};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
        }
    }
}

/// Bounded list payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPayload<T> {
    pub items: Vec<T>,
    pub count: usize,
}

impl<T> From<Vec<T>> for ListPayload<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            count: items.len(),
            items,
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
}

/// Status endpoint response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_sec: u64,
    pub guard: GuardStats,
    pub store: StoreCounts,
}

/// Revision poll response
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RevisionResponse {
    pub revision: u64,
}
