//! Application state
//!
//! Holds the configuration and the shared guard/store components

use crate::admission_guard::{AdmissionGuard, GuardPolicy};
use crate::entity_store::{EntityStore, StoreLimits};
use crate::error::Result;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::sync::Arc;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server port
    pub port: u16,
    /// Server host
    pub host: String,
    /// Admission limits
    pub guard: GuardPolicy,
    /// Entity/state table capacities
    pub store: StoreLimits,
}

impl Default for AppConfig {
    fn default() -> Self {
        let guard_defaults = GuardPolicy::default();
        let store_defaults = StoreLimits::default();

        Self {
            port: env_or("PORT", 8080),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            guard: GuardPolicy {
                max_active_requests: env_or(
                    "GUARD_MAX_ACTIVE_REQUESTS",
                    guard_defaults.max_active_requests,
                ),
                max_clients: env_or("GUARD_MAX_CLIENTS", guard_defaults.max_clients),
                rate_per_sec: env_or("GUARD_RATE_PER_SEC", guard_defaults.rate_per_sec),
                burst: env_or("GUARD_BURST", guard_defaults.burst),
                read_concurrency_per_client: env_or(
                    "GUARD_READ_CONCURRENCY",
                    guard_defaults.read_concurrency_per_client,
                ),
                mutate_concurrency_per_client: env_or(
                    "GUARD_MUTATE_CONCURRENCY",
                    guard_defaults.mutate_concurrency_per_client,
                ),
                ..guard_defaults
            },
            store: StoreLimits {
                max_entities: env_or("STORE_MAX_ENTITIES", store_defaults.max_entities),
                max_states: env_or("STORE_MAX_STATES", store_defaults.max_states),
                max_entity_id_len: env_or(
                    "STORE_MAX_ENTITY_ID_LEN",
                    store_defaults.max_entity_id_len,
                ),
                max_name_len: env_or("STORE_MAX_NAME_LEN", store_defaults.max_name_len),
                max_state_len: env_or("STORE_MAX_STATE_LEN", store_defaults.max_state_len),
                max_attributes_len: env_or(
                    "STORE_MAX_ATTRIBUTES_LEN",
                    store_defaults.max_attributes_len,
                ),
                ..store_defaults
            },
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// AdmissionGuard
    pub guard: Arc<AdmissionGuard>,
    /// EntityStore
    pub store: Arc<EntityStore>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Build components from config; invalid limits fail startup
    pub fn new(config: AppConfig) -> Result<Self> {
        let guard = Arc::new(AdmissionGuard::new(config.guard.clone())?);
        let store = Arc::new(EntityStore::new(config.store)?);

        Ok(Self {
            config,
            guard,
            store,
            started_at: Utc::now(),
        })
    }

    pub fn uptime_sec(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }
}
