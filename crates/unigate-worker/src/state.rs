use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use unigate_registry::SharedRegistry;

/// Shared axum `State` for a Worker process: the Registry snapshot handle
/// and the in-flight request counter the `/admin/shutdown` drain and the
/// Supervisor's routing policy both care about.
pub struct WorkerState {
    pub registry: Arc<SharedRegistry>,
    pub worker_id: String,
    in_flight: Arc<AtomicI64>,
}

impl WorkerState {
    pub fn new(registry: Arc<SharedRegistry>, worker_id: String) -> Self {
        Self {
            registry,
            worker_id,
            in_flight: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn in_flight(&self) -> i64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Marks one request as active; the returned guard decrements on drop
    /// regardless of how the handler future ends (success, error, or the
    /// client disconnecting mid-stream).
    pub fn begin_request(&self) -> RequestGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        RequestGuard {
            counter: self.in_flight.clone(),
        }
    }
}

pub struct RequestGuard {
    counter: Arc<AtomicI64>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
