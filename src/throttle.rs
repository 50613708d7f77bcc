//! Process-wide outbound request throttling
//!
//! Every outbound HTTP request holds one slot of a shared semaphore while in
//! flight, bounding the number of concurrently open connections and cache
//! files regardless of how many sources are in use. The throttle is an
//! explicit object constructed once and shared by `Arc`, never a global, so
//! tests can use isolated instances.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting admission gate for outbound requests
///
/// Cloning shares the underlying capacity: all clones admit against the same
/// slots.
#[derive(Clone, Debug)]
pub struct RequestThrottle {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// An admitted request slot; the slot is freed when this is dropped,
/// including on error and cancellation paths
#[derive(Debug)]
pub struct RequestPermit {
    _permit: OwnedSemaphorePermit,
}

impl RequestThrottle {
    /// Create a throttle with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Create a throttle with the platform default capacity
    ///
    /// 16 on macOS (low default file-descriptor limits), 128 elsewhere. The
    /// numbers are deployment tuning, not correctness.
    pub fn with_default_capacity() -> Self {
        Self::new(if cfg!(target_os = "macos") { 16 } else { 128 })
    }

    /// Wait until a request slot is free and claim it
    pub async fn acquire(&self) -> RequestPermit {
        // The semaphore is never closed, so acquisition can only fail if the
        // throttle itself were dropped, which the owned Arc prevents.
        #[allow(clippy::expect_used)]
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("request throttle semaphore closed");
        RequestPermit { _permit: permit }
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free (diagnostics and tests)
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
