//! Admission permit (released on drop)

use super::GuardInner;
use crate::client_registry::ClientKey;
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;

/// Proof of admission
///
/// Holds one global slot and, for controlled requests, one per-client
/// slot. Dropping it releases the global slot first, then the per-client
/// slot, on every exit path including unwinding.
pub struct AdmissionPermit {
    inner: Arc<GuardInner>,
    global: Option<OwnedSemaphorePermit>,
    client: Option<ClientKey>,
}

impl AdmissionPermit {
    pub(super) fn new(
        inner: Arc<GuardInner>,
        global: OwnedSemaphorePermit,
        client: Option<ClientKey>,
    ) -> Self {
        Self {
            inner,
            global: Some(global),
            client,
        }
    }

    /// Client whose per-client slot this permit holds, if any
    pub fn client(&self) -> Option<ClientKey> {
        self.client
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        drop(self.global.take());
        if let Some(client) = self.client.take() {
            self.inner.release_client(client);
            tracing::debug!(client = %client, "Admission released");
        }
    }
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("client", &self.client)
            .finish()
    }
}
