//! Blocking synchronization helpers shared by requests, the orchestrator and the launch correlator.
//!
//! The orchestration core runs on plain OS threads, so waits are `Mutex` + `Condvar` with explicit deadlines.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use testplatform_core::{PlatformError, PlatformResult};

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Listener panics are isolated before they can poison request state, so a poisoned lock here only means a panic
/// in unrelated code; the protected data is still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventState {
    Unset,
    Set,
    Disposed,
}

/// A manual-reset event: once set, every current and future waiter returns until it is reset.
///
/// Disposing the event wakes all waiters with an error and makes further waits fail instead of blocking forever.
#[derive(Debug)]
pub struct Event {
    name: &'static str,
    state: Mutex<EventState>,
    cond: Condvar,
}

impl Event {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(EventState::Unset),
            cond: Condvar::new(),
        }
    }

    /// Set the event and wake all waiters. No-op once disposed.
    pub fn set(&self) {
        let mut state = lock(&self.state);
        if *state == EventState::Unset {
            *state = EventState::Set;
            self.cond.notify_all();
        }
    }

    /// Return the event to the unset state. No-op once disposed.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        if *state == EventState::Set {
            *state = EventState::Unset;
        }
    }

    pub fn is_set(&self) -> bool {
        *lock(&self.state) == EventState::Set
    }

    /// Release the event. Waiters wake with a disposed error; calling twice is a no-op.
    pub fn dispose(&self) {
        let mut state = lock(&self.state);
        if *state != EventState::Disposed {
            *state = EventState::Disposed;
            self.cond.notify_all();
        }
    }

    /// Block until the event is set or `timeout` elapses. `None` waits without a deadline.
    ///
    /// Returns `Ok(true)` if the event was set, `Ok(false)` on timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> PlatformResult<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = lock(&self.state);
        loop {
            match *state {
                EventState::Set => return Ok(true),
                EventState::Disposed => return Err(PlatformError::Disposed(self.name)),
                EventState::Unset => {}
            }
            state = match deadline {
                None => self.cond.wait(state).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    self.cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_returns_immediately_when_set() {
        let event = Event::new("test");
        event.set();
        assert!(event.wait(Some(Duration::ZERO)).unwrap());
    }

    #[test]
    fn test_wait_times_out_when_unset() {
        let event = Event::new("test");
        assert!(!event.wait(Some(Duration::from_millis(20))).unwrap());
    }

    #[test]
    fn test_set_wakes_waiter_on_other_thread() {
        let event = Arc::new(Event::new("test"));
        let waiter = {
            let event = Arc::clone(&event);
            thread::spawn(move || event.wait(Some(Duration::from_secs(5))))
        };
        thread::sleep(Duration::from_millis(20));
        event.set();
        assert!(waiter.join().unwrap().unwrap());
    }

    #[test]
    fn test_dispose_fails_waiters() {
        let event = Arc::new(Event::new("completion"));
        let waiter = {
            let event = Arc::clone(&event);
            thread::spawn(move || event.wait(None))
        };
        thread::sleep(Duration::from_millis(20));
        event.dispose();
        assert!(matches!(waiter.join().unwrap(), Err(PlatformError::Disposed("completion"))));
        assert!(event.wait(Some(Duration::ZERO)).is_err());
    }

    #[test]
    fn test_reset_after_set() {
        let event = Event::new("test");
        event.set();
        event.reset();
        assert!(!event.is_set());
        event.dispose();
        event.set();
        assert!(!event.is_set());
    }
}
