//! Panel Gateway Library
//!
//! HTTP backend of a wall-mounted home-automation panel.
//!
//! ## Architecture (5 Components)
//!
//! 1. ClientRegistry - Bounded per-client tables (rate buckets, in-flight counts)
//! 2. AdmissionGuard - Rate, per-client and global concurrency control
//! 3. EntityStore - Entity/state model with revision counter
//! 4. WebAPI - REST API endpoints behind the guard middleware
//! 5. AppState - Configuration and shared components
//!
//! ## Design Principles
//!
//! - Bounded memory: every table has a fixed capacity
//! - Fail closed: an unusable guard rejects instead of admitting
//! - Release on every path: admission is held by an RAII permit

pub mod admission_guard;
pub mod client_registry;
pub mod entity_store;
pub mod error;
pub mod models;
pub mod state;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
