//! AdmissionGuard - Request admission control
//!
//! ## Responsibilities
//!
//! - Per-client token-bucket rate limiting
//! - Per-client in-flight limits (read vs mutate)
//! - Global in-flight budget
//!
//! ## Design
//!
//! - Only the controlled class (API paths) is rate/concurrency limited;
//!   every request consumes one global slot
//! - Fail fast: nothing is queued, rejections are returned immediately
//! - Rate and per-client checks for one request run in a single critical
//!   section; the global gate is a non-blocking semaphore acquire
//! - Release is tied to `AdmissionPermit` drop

mod permit;
mod types;

pub use permit::AdmissionPermit;
pub use types::*;

use crate::client_registry::{ClientKey, ConcurrencyTable, RateTable};
use crate::error::Result;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::{Semaphore, TryAcquireError};

/// Per-client tables, guarded together
struct GuardTables {
    rates: RateTable,
    active: ConcurrencyTable,
}

/// State shared between the guard and outstanding permits
pub(crate) struct GuardInner {
    tables: Mutex<GuardTables>,
    epoch: Instant,
}

impl GuardInner {
    fn now_ms(&self) -> i64 {
        i64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(i64::MAX)
    }

    /// Decrement the client's in-flight count
    ///
    /// Runs from `Drop`, so a poisoned lock is recovered rather than
    /// propagated: a decrement can never widen admission.
    fn release_client(&self, client: ClientKey) {
        let now_ms = self.now_ms();
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        tables.active.release(client, now_ms);
    }
}

#[derive(Default)]
struct OutcomeCounters {
    admitted: AtomicU64,
    rate_rejected: AtomicU64,
    concurrency_rejected: AtomicU64,
    server_busy: AtomicU64,
    init_failed: AtomicU64,
}

/// AdmissionGuard instance
pub struct AdmissionGuard {
    policy: GuardPolicy,
    inner: Arc<GuardInner>,
    global: Arc<Semaphore>,
    counters: OutcomeCounters,
}

impl AdmissionGuard {
    /// Create new AdmissionGuard
    ///
    /// Fails with `Error::Unavailable` when the policy cannot back a
    /// working guard (zero or oversized capacity, failed table allocation).
    pub fn new(policy: GuardPolicy) -> Result<Self> {
        policy.validate()?;

        let tables = GuardTables {
            rates: RateTable::new(policy.max_clients, policy.rate_per_sec, policy.burst)?,
            active: ConcurrencyTable::new(policy.max_clients)?,
        };

        tracing::info!(
            max_active_requests = policy.max_active_requests,
            max_clients = policy.max_clients,
            rate_per_sec = policy.rate_per_sec,
            burst = policy.burst,
            read_limit = policy.read_concurrency_per_client,
            mutate_limit = policy.mutate_concurrency_per_client,
            "AdmissionGuard initialized"
        );

        Ok(Self {
            global: Arc::new(Semaphore::new(policy.max_active_requests)),
            inner: Arc::new(GuardInner {
                tables: Mutex::new(tables),
                epoch: Instant::now(),
            }),
            counters: OutcomeCounters::default(),
            policy,
        })
    }

    pub fn policy(&self) -> &GuardPolicy {
        &self.policy
    }

    /// Build the descriptor for an HTTP request
    pub fn classify(
        &self,
        path: &str,
        method: &axum::http::Method,
        peer: Option<std::net::SocketAddr>,
    ) -> RequestDescriptor {
        RequestDescriptor::from_parts(path, method, peer, &self.policy.controlled_prefix)
    }

    /// Run every admission check and reserve the slots on success
    pub fn try_admit(
        &self,
        request: &RequestDescriptor,
    ) -> std::result::Result<AdmissionPermit, Rejection> {
        if request.controlled {
            self.check_client(request)?;
        }

        match self.global.clone().try_acquire_owned() {
            Ok(global) => {
                self.counters.admitted.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    client = %request.client,
                    controlled = request.controlled,
                    method = ?request.method,
                    "Request admitted"
                );
                let client = request.controlled.then_some(request.client);
                Ok(AdmissionPermit::new(self.inner.clone(), global, client))
            }
            Err(err) => {
                if request.controlled {
                    self.inner.release_client(request.client);
                }
                let rejection = match err {
                    TryAcquireError::NoPermits => Rejection::ServerBusy,
                    TryAcquireError::Closed => Rejection::InitFailed,
                };
                Err(self.reject(request, rejection))
            }
        }
    }

    /// Rate check then per-client reservation, atomically
    fn check_client(&self, request: &RequestDescriptor) -> std::result::Result<(), Rejection> {
        let now_ms = self.inner.now_ms();
        let mut tables = match self.inner.tables.lock() {
            Ok(tables) => tables,
            Err(_) => {
                tracing::warn!("Admission tables poisoned, failing closed");
                return Err(self.reject(request, Rejection::InitFailed));
            }
        };

        if !tables.rates.check(request.client, now_ms) {
            drop(tables);
            return Err(self.reject(request, Rejection::RateLimited));
        }

        let limit = self.policy.concurrency_limit(request.method);
        if !tables.active.try_acquire(request.client, limit, now_ms) {
            drop(tables);
            return Err(self.reject(request, Rejection::ClientBusy));
        }

        Ok(())
    }

    fn reject(&self, request: &RequestDescriptor, rejection: Rejection) -> Rejection {
        let counter = match rejection {
            Rejection::RateLimited => &self.counters.rate_rejected,
            Rejection::ClientBusy => &self.counters.concurrency_rejected,
            Rejection::ServerBusy => &self.counters.server_busy,
            Rejection::InitFailed => &self.counters.init_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            client = %request.client,
            method = ?request.method,
            rejection = ?rejection,
            "Request rejected"
        );
        rejection
    }

    /// Admit, then run an async handler to completion
    ///
    /// The handler is invoked at most once. Slots are released when the
    /// handler finishes, fails, panics, or its future is dropped.
    pub async fn admit_and_run<F, Fut, T>(
        &self,
        request: &RequestDescriptor,
        handler: F,
    ) -> AdmissionOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let permit = match self.try_admit(request) {
            Ok(permit) => permit,
            Err(rejection) => return rejection.into(),
        };
        let result = handler().await;
        drop(permit);
        AdmissionOutcome::Pass(result)
    }

    /// Admit, then run a synchronous handler
    ///
    /// For thread-per-connection callers.
    pub fn admit_and_run_blocking<F, T>(
        &self,
        request: &RequestDescriptor,
        handler: F,
    ) -> AdmissionOutcome<T>
    where
        F: FnOnce() -> T,
    {
        let permit = match self.try_admit(request) {
            Ok(permit) => permit,
            Err(rejection) => return rejection.into(),
        };
        let result = handler();
        drop(permit);
        AdmissionOutcome::Pass(result)
    }

    /// Current in-flight count for a client
    pub fn client_in_flight(&self, client: ClientKey) -> u32 {
        let tables = self.inner.tables.lock().unwrap_or_else(PoisonError::into_inner);
        tables.active.in_flight(client)
    }

    /// Current bucket level (milli-tokens) for a client, if tracked
    pub fn client_tokens_milli(&self, client: ClientKey) -> Option<i64> {
        let tables = self.inner.tables.lock().unwrap_or_else(PoisonError::into_inner);
        tables.rates.tokens_milli(client)
    }

    pub fn available_global_slots(&self) -> usize {
        self.global.available_permits()
    }

    /// Status snapshot
    pub fn stats(&self) -> GuardStats {
        let (tracked_rate_clients, tracked_active_clients, controlled_in_flight) = {
            let tables = self.inner.tables.lock().unwrap_or_else(PoisonError::into_inner);
            (
                tables.rates.len(),
                tables.active.len(),
                tables.active.total_in_flight(),
            )
        };

        GuardStats {
            max_active_requests: self.policy.max_active_requests,
            active_requests: self
                .policy
                .max_active_requests
                .saturating_sub(self.global.available_permits()),
            tracked_rate_clients,
            tracked_active_clients,
            controlled_in_flight,
            admitted_total: self.counters.admitted.load(Ordering::Relaxed),
            rate_rejected_total: self.counters.rate_rejected.load(Ordering::Relaxed),
            concurrency_rejected_total: self.counters.concurrency_rejected.load(Ordering::Relaxed),
            server_busy_total: self.counters.server_busy.load(Ordering::Relaxed),
            init_failed_total: self.counters.init_failed.load(Ordering::Relaxed),
        }
    }
}
