//! Registrars: how a caller hooks its listeners onto the requests the orchestrator creates.

use std::sync::Arc;

use super::discovery_request::DiscoveryRequest;
use super::run_request::TestRunRequest;

/// Attaches caller listeners to each run the orchestrator creates.
pub trait TestRunEventsRegistrar: Send + Sync {
    fn register_test_run_events(&self, request: &Arc<TestRunRequest>);

    /// Called exactly once for every `register_test_run_events`, whether the run succeeded or not.
    fn unregister_test_run_events(&self, request: &Arc<TestRunRequest>);

    /// A failure that prevented the run from completing normally.
    fn log_error(&self, message: &str);
}

/// Attaches caller listeners to each discovery the orchestrator creates.
pub trait TestDiscoveryEventsRegistrar: Send + Sync {
    fn register_discovery_events(&self, request: &Arc<DiscoveryRequest>);

    /// Called exactly once for every `register_discovery_events`.
    fn unregister_discovery_events(&self, request: &Arc<DiscoveryRequest>);

    fn log_error(&self, message: &str);
}

/// Registers on construction, unregisters on drop.
pub(crate) struct RunRegistration<'a> {
    registrar: &'a dyn TestRunEventsRegistrar,
    request: Arc<TestRunRequest>,
}

impl<'a> RunRegistration<'a> {
    pub(crate) fn new(registrar: &'a dyn TestRunEventsRegistrar, request: &Arc<TestRunRequest>) -> Self {
        registrar.register_test_run_events(request);
        Self {
            registrar,
            request: Arc::clone(request),
        }
    }
}

impl Drop for RunRegistration<'_> {
    fn drop(&mut self) {
        self.registrar.unregister_test_run_events(&self.request);
    }
}

pub(crate) struct DiscoveryRegistration<'a> {
    registrar: &'a dyn TestDiscoveryEventsRegistrar,
    request: Arc<DiscoveryRequest>,
}

impl<'a> DiscoveryRegistration<'a> {
    pub(crate) fn new(registrar: &'a dyn TestDiscoveryEventsRegistrar, request: &Arc<DiscoveryRequest>) -> Self {
        registrar.register_discovery_events(request);
        Self {
            registrar,
            request: Arc::clone(request),
        }
    }
}

impl Drop for DiscoveryRegistration<'_> {
    fn drop(&mut self) {
        self.registrar.unregister_discovery_events(&self.request);
    }
}
