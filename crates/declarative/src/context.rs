//! Progress reporting and cancellation for apply runs
//!
//! These let a host observe and stop a run without the engine knowing
//! anything about terminals or signals.

use crate::types::{Action, ApplySummary, Outcome, ResourceAddress};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Progress callback for apply runs
///
/// Always invoked from the coordinating thread, never from workers.
pub trait ProgressCallback: Send {
    /// Called once before any resource is attempted
    fn on_apply_start(&mut self, count: usize);

    /// Called when a remote operation for a resource is dispatched
    fn on_resource_start(&mut self, address: &ResourceAddress, action: Action);

    /// Called when a resource reaches its terminal outcome
    fn on_resource_complete(&mut self, address: &ResourceAddress, action: Action, outcome: &Outcome);

    /// Called once every resource has an outcome
    fn on_apply_complete(&mut self, summary: &ApplySummary);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_apply_start(&mut self, _count: usize) {}
    fn on_resource_start(&mut self, _address: &ResourceAddress, _action: Action) {}
    fn on_resource_complete(&mut self, _address: &ResourceAddress, _action: Action, _outcome: &Outcome) {}
    fn on_apply_complete(&mut self, _summary: &ApplySummary) {}
}

/// Cooperative cancellation shared between a host and a running apply
///
/// Cancelling stops new operations from being dispatched. Operations already
/// in flight run to completion and their results are recorded.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also trips once `timeout` has elapsed
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            flag: Arc::clone(&self.flag),
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_timeout_trips() {
        let token = CancelToken::new().with_timeout(Duration::ZERO);
        assert!(token.is_cancelled());

        let token = CancelToken::new().with_timeout(Duration::from_secs(3600));
        assert!(!token.is_cancelled());
    }
}
