//! Request listeners.
//!
//! Listeners are notified outside every request lock, from whichever thread produced the event, and a panicking
//! listener is logged and skipped so it can neither poison the request nor starve the listeners after it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use testplatform_core::objectmodel::{
    DiscoveryCompleteEventArgs, TestCase, TestMessageLevel, TestRunChangedEventArgs, TestRunCompleteEventArgs,
};

use super::criteria::{DiscoveryCriteria, TestRunCriteria};
use crate::sync::lock;

/// Observes a test run. Every method defaults to a no-op.
pub trait TestRunEventsListener: Send + Sync {
    fn on_run_start(&self, _criteria: &TestRunCriteria) {}

    fn on_run_stats_change(&self, _args: &TestRunChangedEventArgs) {}

    /// Last event of the run.
    fn on_run_complete(&self, _args: &TestRunCompleteEventArgs, _last_chunk: Option<&TestRunChangedEventArgs>) {}

    fn on_log_message(&self, _level: TestMessageLevel, _message: &str) {}

    fn on_raw_message(&self, _raw: &str) {}
}

/// Observes a discovery. Every method defaults to a no-op.
pub trait DiscoveryEventsListener: Send + Sync {
    fn on_discovery_start(&self, _criteria: &DiscoveryCriteria) {}

    fn on_discovered_tests(&self, _tests: &[TestCase]) {}

    /// Last event of the discovery.
    fn on_discovery_complete(&self, _args: &DiscoveryCompleteEventArgs, _last_chunk: &[TestCase]) {}

    fn on_log_message(&self, _level: TestMessageLevel, _message: &str) {}

    fn on_raw_message(&self, _raw: &str) {}
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Subscription list for one request.
pub(crate) struct Listeners<L: ?Sized> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, Arc<L>)>>,
}

impl<L: ?Sized> Default for Listeners<L> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<L: ?Sized> Listeners<L> {
    pub(crate) fn subscribe(&self, listener: Arc<L>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.entries).push((id, listener));
        id
    }

    pub(crate) fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Deliver `event` to a snapshot of the current listeners.
    pub(crate) fn notify(&self, event: &'static str, deliver: impl Fn(&L)) {
        let snapshot: Vec<Arc<L>> = lock(&self.entries).iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| deliver(&*listener))).is_err() {
                tracing::error!(event, "request listener panicked; continuing with remaining listeners");
            }
        }
    }
}
