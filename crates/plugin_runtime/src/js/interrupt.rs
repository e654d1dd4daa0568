//! Stop signalling between a task handle and its script worker.
//!
//! `Stop()` only records the request. The engine polls [`StopSignal::checkpoint`]
//! from its interrupt handler; the first checkpoint after a request unwinds
//! the script and marks the signal as fired, which the worker reads to tell a
//! deliberate stop apart from a script fault.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct StopState {
    requested: AtomicBool,
    fired: AtomicBool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct StopSignal {
    state: Arc<StopState>,
}

impl StopSignal {
    pub(crate) fn request(&self) {
        self.state.requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_requested(&self) -> bool {
        self.state.requested.load(Ordering::SeqCst)
    }

    /// Safe point. Returns true when execution must unwind.
    pub(crate) fn checkpoint(&self) -> bool {
        if self.is_requested() {
            self.state.fired.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// Whether a checkpoint has unwound the script
    pub(crate) fn has_fired(&self) -> bool {
        self.state.fired.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_only_after_request() {
        let signal = StopSignal::default();
        assert!(!signal.checkpoint());
        assert!(!signal.has_fired());

        let handle = signal.clone();
        handle.request();
        assert!(!signal.has_fired());
        assert!(signal.checkpoint());
        assert!(signal.has_fired());
    }
}
