//! Busy indicator shared between the coordinator and the adapters

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Flag marking an in-flight merge/evaluate/publish cycle
///
/// Written only by the coordinator; adapters read it to coalesce bursts of
/// external writes into at most one pending batch per busy period. This is
/// the only shared state that crosses the component boundary outside the
/// queues.
#[derive(Debug, Clone, Default)]
pub struct RunningIndicator(Arc<AtomicBool>);

impl RunningIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coordinator-only: mark the busy span
    pub fn set(&self, running: bool) {
        self.0.store(running, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
