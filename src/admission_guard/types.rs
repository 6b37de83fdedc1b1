//! AdmissionGuard types

use crate::client_registry::ClientKey;
use crate::error::Error;
use axum::http::Method;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Coarse request shape, selects the per-client concurrency limit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MethodClass {
    Read,
    Mutate,
}

impl MethodClass {
    pub fn from_method(method: &Method) -> Self {
        if method == Method::GET || method == Method::HEAD || method == Method::OPTIONS {
            Self::Read
        } else {
            Self::Mutate
        }
    }
}

/// What the guard needs to know about an inbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub client: ClientKey,
    /// Subject to rate and per-client concurrency enforcement
    pub controlled: bool,
    pub method: MethodClass,
}

impl RequestDescriptor {
    pub fn controlled(client: ClientKey, method: MethodClass) -> Self {
        Self {
            client,
            controlled: true,
            method,
        }
    }

    pub fn uncontrolled(client: ClientKey, method: MethodClass) -> Self {
        Self {
            client,
            controlled: false,
            method,
        }
    }

    pub fn from_parts(path: &str, method: &Method, peer: Option<SocketAddr>, prefix: &str) -> Self {
        Self {
            client: ClientKey::from_peer(peer),
            controlled: path.starts_with(prefix),
            method: MethodClass::from_method(method),
        }
    }
}

/// Guard limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardPolicy {
    /// Requests allowed past the global gate at once
    pub max_active_requests: usize,
    /// Capacity of each per-client table
    pub max_clients: usize,
    /// Token refill rate (tokens per second)
    pub rate_per_sec: u32,
    /// Token bucket capacity
    pub burst: u32,
    /// Per-client in-flight limit for read-like requests
    pub read_concurrency_per_client: u32,
    /// Per-client in-flight limit for mutating requests
    pub mutate_concurrency_per_client: u32,
    /// Path prefix of the controlled request class
    pub controlled_prefix: String,
    /// Retry hint sent with rejections
    pub retry_after_secs: u32,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            max_active_requests: 2,
            max_clients: 16,
            rate_per_sec: 5,
            burst: 10,
            read_concurrency_per_client: 2,
            mutate_concurrency_per_client: 1,
            controlled_prefix: "/api/".to_string(),
            retry_after_secs: 1,
        }
    }
}

impl GuardPolicy {
    pub fn concurrency_limit(&self, method: MethodClass) -> u32 {
        match method {
            MethodClass::Read => self.read_concurrency_per_client,
            MethodClass::Mutate => self.mutate_concurrency_per_client,
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.max_active_requests == 0 {
            return Err(Error::Unavailable(
                "max_active_requests must be at least 1".to_string(),
            ));
        }
        if self.max_active_requests > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(Error::Unavailable(format!(
                "max_active_requests must be at most {}",
                tokio::sync::Semaphore::MAX_PERMITS
            )));
        }
        if self.max_clients == 0 {
            return Err(Error::Unavailable(
                "max_clients must be at least 1".to_string(),
            ));
        }
        if self.burst == 0 {
            return Err(Error::Unavailable("burst must be at least 1".to_string()));
        }
        if self.read_concurrency_per_client == 0 || self.mutate_concurrency_per_client == 0 {
            return Err(Error::Unavailable(
                "per-client concurrency limits must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Why a request was not admitted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rejection {
    /// Client token bucket empty
    RateLimited,
    /// Client already at its in-flight limit
    ClientBusy,
    /// Global capacity exhausted
    ServerBusy,
    /// Guard state unusable
    InitFailed,
}

impl Rejection {
    pub fn message(&self) -> &'static str {
        match self {
            Self::RateLimited => "Too many requests",
            Self::ClientBusy => "Too many concurrent requests",
            Self::ServerBusy => "Server busy",
            Self::InitFailed => "Service unavailable",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited => "RATE_LIMITED",
            Self::ClientBusy => "CLIENT_BUSY",
            Self::ServerBusy => "SERVER_BUSY",
            Self::InitFailed => "INIT_FAILED",
        }
    }

    /// 429 for per-client pressure, 503 when the server itself cannot take more
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::RateLimited | Self::ClientBusy => StatusCode::TOO_MANY_REQUESTS,
            Self::ServerBusy | Self::InitFailed => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Result of `admit_and_run`: exactly one per call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionOutcome<T> {
    /// Handler ran; its result
    Pass(T),
    RateRejected,
    ConcurrencyRejected,
    ServerBusy,
    InitFailed,
}

impl<T> AdmissionOutcome<T> {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass(_))
    }

    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Self::Pass(_) => None,
            Self::RateRejected => Some(Rejection::RateLimited),
            Self::ConcurrencyRejected => Some(Rejection::ClientBusy),
            Self::ServerBusy => Some(Rejection::ServerBusy),
            Self::InitFailed => Some(Rejection::InitFailed),
        }
    }
}

impl<T> From<Rejection> for AdmissionOutcome<T> {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::RateLimited => Self::RateRejected,
            Rejection::ClientBusy => Self::ConcurrencyRejected,
            Rejection::ServerBusy => Self::ServerBusy,
            Rejection::InitFailed => Self::InitFailed,
        }
    }
}

/// Guard status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardStats {
    pub max_active_requests: usize,
    pub active_requests: usize,
    pub tracked_rate_clients: usize,
    pub tracked_active_clients: usize,
    pub controlled_in_flight: u32,
    pub admitted_total: u64,
    pub rate_rejected_total: u64,
    pub concurrency_rejected_total: u64,
    pub server_busy_total: u64,
    pub init_failed_total: u64,
}
