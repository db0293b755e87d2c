//! Lifecycle shared by discovery and run requests.
//!
//! ```text
//! Pending --start--> InProgress --completion--> Completed | Canceled | Aborted
//!    ^                   |
//!    +---start failed----+
//! ```
//!
//! All transitions happen under one mutex; proxies and listeners are always called after it is released, so a
//! proxy that reports completion synchronously from inside `start` cannot deadlock the request.
//!
//! Progress notifications run under a separate delivery lock which the completion claim also takes, so nothing
//! reaches listeners after the completion. A progress listener must not complete its own request.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use testplatform_core::{PlatformError, PlatformResult};

use crate::sync::{Event, lock};

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    Pending,
    InProgress,
    Completed,
    Canceled,
    Aborted,
}

impl RequestState {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestState::Pending => "Pending",
            RequestState::InProgress => "InProgress",
            RequestState::Completed => "Completed",
            RequestState::Canceled => "Canceled",
            RequestState::Aborted => "Aborted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::Canceled | RequestState::Aborted
        )
    }

    /// Terminal state for a completion carrying these flags. Abort wins over cancel.
    pub fn from_completion(is_canceled: bool, is_aborted: bool) -> Self {
        if is_aborted {
            RequestState::Aborted
        } else if is_canceled {
            RequestState::Canceled
        } else {
            RequestState::Completed
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct CoreState<P: ?Sized> {
    state: RequestState,
    proxy: Option<Arc<P>>,
    started_at: Option<Instant>,
    elapsed: Option<Duration>,
    disposed: bool,
    completion_claimed: bool,
}

/// State machine plus completion signal, parameterized over the proxy type.
pub(crate) struct RequestCore<P: ?Sized> {
    kind: &'static str,
    inner: Mutex<CoreState<P>>,
    delivery: Mutex<()>,
    started: Event,
    completion: Event,
}

impl<P: ?Sized> RequestCore<P> {
    pub(crate) fn new(kind: &'static str, proxy: Arc<P>) -> Self {
        Self {
            kind,
            inner: Mutex::new(CoreState {
                state: RequestState::Pending,
                proxy: Some(proxy),
                started_at: None,
                elapsed: None,
                disposed: false,
                completion_claimed: false,
            }),
            delivery: Mutex::new(()),
            started: Event::new(kind),
            completion: Event::new(kind),
        }
    }

    pub(crate) fn state(&self) -> RequestState {
        lock(&self.inner).state
    }

    /// Time between start and completion, once completed.
    pub(crate) fn elapsed(&self) -> Option<Duration> {
        lock(&self.inner).elapsed
    }

    /// Run a progress notification unless the completion was claimed. Returns whether it ran.
    pub(crate) fn deliver_progress(&self, deliver: impl FnOnce()) -> bool {
        let _delivery = lock(&self.delivery);
        if lock(&self.inner).completion_claimed {
            return false;
        }
        deliver();
        true
    }

    /// Pending -> InProgress. Returns the proxy to start outside the lock.
    pub(crate) fn begin_start(&self) -> PlatformResult<Arc<P>> {
        let mut inner = lock(&self.inner);
        if inner.disposed {
            return Err(PlatformError::Disposed(self.kind));
        }
        if inner.state != RequestState::Pending {
            return Err(PlatformError::invalid_operation(format!(
                "{} cannot start: state is {}",
                self.kind, inner.state
            )));
        }
        let proxy = inner
            .proxy
            .clone()
            .ok_or_else(|| PlatformError::invalid_operation(format!("{} has no proxy", self.kind)))?;
        inner.state = RequestState::InProgress;
        inner.started_at = Some(Instant::now());
        drop(inner);
        self.started.set();
        Ok(proxy)
    }

    /// Block until `begin_start` ran. `false` on timeout or after dispose.
    pub(crate) fn wait_started(&self, timeout: Duration) -> bool {
        self.started.wait(Some(timeout)).unwrap_or(false)
    }

    /// The proxy refused to start: InProgress -> Pending, unless a completion already arrived.
    pub(crate) fn revert_start(&self) {
        let mut inner = lock(&self.inner);
        if inner.state == RequestState::InProgress && !inner.completion_claimed {
            inner.state = RequestState::Pending;
            inner.started_at = None;
        }
    }

    /// Wait for the completion signal. A request that never started counts as complete.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> PlatformResult<bool> {
        {
            let inner = lock(&self.inner);
            if inner.disposed {
                return Err(PlatformError::Disposed(self.kind));
            }
            if inner.state == RequestState::Pending {
                return Ok(true);
            }
        }
        self.completion.wait(timeout)
    }

    /// Proxy to cancel or abort, if the request is in progress. Otherwise logs and returns `None`.
    pub(crate) fn proxy_for(&self, operation: &'static str) -> PlatformResult<Option<Arc<P>>> {
        let inner = lock(&self.inner);
        if inner.disposed {
            return Err(PlatformError::Disposed(self.kind));
        }
        if inner.state != RequestState::InProgress || inner.completion_claimed {
            tracing::info!(request = self.kind, operation, state = %inner.state, "ignored: request is not in progress");
            return Ok(None);
        }
        Ok(inner.proxy.clone())
    }

    /// Claim the one and only completion. Returns the proxy to close, or `None` if completion was already handled
    /// or the request was disposed.
    /// Waits for a progress notification in flight.
    pub(crate) fn claim_completion(&self) -> Option<Option<Arc<P>>> {
        let _delivery = lock(&self.delivery);
        let mut inner = lock(&self.inner);
        if inner.disposed || inner.completion_claimed {
            tracing::debug!(request = self.kind, "duplicate or late completion ignored");
            return None;
        }
        inner.completion_claimed = true;
        inner.elapsed = inner.started_at.map(|t| t.elapsed());
        Some(inner.proxy.take())
    }

    /// Record the terminal state after a claimed completion.
    pub(crate) fn finish(&self, terminal: RequestState) {
        let mut inner = lock(&self.inner);
        inner.state = terminal;
    }

    pub(crate) fn signal_completion(&self) {
        self.completion.set();
    }

    /// Release the request. Returns a proxy that still needs closing. Calling twice is a no-op.
    pub(crate) fn dispose(&self) -> Option<Arc<P>> {
        let proxy = {
            let mut inner = lock(&self.inner);
            if inner.disposed {
                return None;
            }
            inner.disposed = true;
            inner.proxy.take()
        };
        self.started.dispose();
        self.completion.dispose();
        proxy
    }
}

/// Close a proxy, logging instead of propagating failures.
pub(crate) fn close_logged<P: ?Sized>(kind: &'static str, proxy: &P, close: impl FnOnce(&P) -> PlatformResult<()>) {
    if let Err(err) = close(proxy) {
        tracing::warn!(request = kind, error = %err, "closing proxy failed");
    }
}
