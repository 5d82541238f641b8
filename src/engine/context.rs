use crate::common::model::RunMode;
use crate::common::status::RunStatus;
use crate::engine::gate::ConcurrencyGate;
use crate::proxy::ProxyPool;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;

/// Per-run view of the scheduler that a matrix needs: the gate, the global
/// status, the proxy pool and the number of active matrices.
#[derive(Clone)]
pub struct RunContext {
    pub gate: Arc<ConcurrencyGate>,
    pub status: watch::Receiver<RunStatus>,
    pub use_proxy: bool,
    pub proxy: Arc<ProxyPool>,
    pub active_matrices: Arc<AtomicUsize>,
    pub mode: RunMode,
}

impl RunContext {
    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    /// In-flight allowance for one matrix: gate capacity split evenly across
    /// active matrices, at least 1.
    pub fn fair_share(&self) -> usize {
        let active = self.active_matrices.load(Ordering::SeqCst).max(1);
        (self.gate.capacity() / active).max(1)
    }
}
