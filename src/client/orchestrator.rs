//! The request orchestrator: the single entry point for discovery and runs.
//!
//! ## Notes
//!
//! - One request lock serializes every `discover_tests` and `run_tests` call for the whole pipeline
//!   (criteria, proxy, request, start, wait, unregister), so two requests never share a host.
//! - The request in flight is published through a weak pointer plus a ready event. Cancel and abort wait on the
//!   event (bounded by `request_creation_timeout`) so that a cancel sent just before the request exists still
//!   reaches it; if nothing appears in time the call is dropped.
//! - Platform errors are caught here, once, and reported to the registrar; panics propagate.

use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use testplatform_core::objectmodel::{
    DiscoveryRequestPayload, TestPlatformOptions, TestRunCompleteEventArgs, TestRunRequestPayload,
};
use testplatform_core::{MetricsCollection, PlatformError, PlatformResult};

use super::SharedMetrics;
use super::criteria::{DiscoveryCriteria, RunTarget, TestRunCriteria};
use super::discovery_request::DiscoveryRequest;
use super::proxy::TestEngine;
use super::registrar::{DiscoveryRegistration, RunRegistration, TestDiscoveryEventsRegistrar, TestRunEventsRegistrar};
use super::request::RequestState;
use super::run_request::TestRunRequest;
use crate::artifacts::ArtifactStore;
use crate::config::PlatformConfig;
use crate::hosting::TestHostLauncher;
use crate::sync::{Event, lock};

/// Result of the most recent run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: RequestState,
    pub complete_args: Option<TestRunCompleteEventArgs>,
    pub metrics: MetricsCollection,
    pub elapsed: Option<Duration>,
}

/// Result of the most recent discovery.
#[derive(Debug, Clone)]
pub struct DiscoveryOutcome {
    pub state: RequestState,
    pub total_tests: i64,
    pub metrics: MetricsCollection,
}

/// A published in-flight request plus the event announcing it.
struct Current<R> {
    request: Mutex<Weak<R>>,
    ready: Event,
}

impl<R> Current<R> {
    fn new(name: &'static str) -> Self {
        Self {
            request: Mutex::new(Weak::new()),
            ready: Event::new(name),
        }
    }

    fn publish(&self, request: &Arc<R>) {
        *lock(&self.request) = Arc::downgrade(request);
        self.ready.set();
    }

    fn clear(&self) {
        let mut request = lock(&self.request);
        *request = Weak::new();
        self.ready.reset();
    }

    /// Wait for a published request, then return it if it is still alive.
    fn await_request(&self, timeout: Duration) -> Option<Arc<R>> {
        match self.ready.wait(Some(timeout)) {
            Ok(true) => lock(&self.request).upgrade(),
            Ok(false) | Err(_) => None,
        }
    }
}

/// Clears a published request when the pipeline unwinds.
struct Published<'a, R> {
    current: &'a Current<R>,
}

impl<R> Drop for Published<'_, R> {
    fn drop(&mut self) {
        self.current.clear();
    }
}

trait Disposable {
    fn dispose(&self);
}

impl Disposable for TestRunRequest {
    fn dispose(&self) {
        TestRunRequest::dispose(self);
    }
}

impl Disposable for DiscoveryRequest {
    fn dispose(&self) {
        DiscoveryRequest::dispose(self);
    }
}

/// Disposes a request when the pipeline unwinds.
struct DisposeOnDrop<'a, R: Disposable>(&'a R);

impl<R: Disposable> Drop for DisposeOnDrop<'_, R> {
    fn drop(&mut self) {
        self.0.dispose();
    }
}

/// Process-wide coordinator for discovery and runs.
pub struct TestRequestManager {
    engine: Arc<dyn TestEngine>,
    config: PlatformConfig,
    artifacts: ArtifactStore,
    request_lock: Mutex<()>,
    current_run: Current<TestRunRequest>,
    current_discovery: Current<DiscoveryRequest>,
    skip_default_adapters: Mutex<bool>,
    last_run: Mutex<Option<RunOutcome>>,
    last_discovery: Mutex<Option<DiscoveryOutcome>>,
}

impl TestRequestManager {
    pub fn new(engine: Arc<dyn TestEngine>, config: PlatformConfig) -> Self {
        let artifacts = match &config.artifacts_root {
            Some(root) => ArtifactStore::new(root, uuid::Uuid::new_v4()),
            None => ArtifactStore::in_temp_dir(),
        };
        Self {
            engine,
            config,
            artifacts,
            request_lock: Mutex::new(()),
            current_run: Current::new("current run"),
            current_discovery: Current::new("current discovery"),
            skip_default_adapters: Mutex::new(false),
            last_run: Mutex::new(None),
            last_discovery: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn last_run_outcome(&self) -> Option<RunOutcome> {
        lock(&self.last_run).clone()
    }

    pub fn last_discovery_outcome(&self) -> Option<DiscoveryOutcome> {
        lock(&self.last_discovery).clone()
    }

    /// Make `paths` available to every subsequent host. Once explicit extensions are known, hosts skip the
    /// default adapter probing.
    pub fn initialize_extensions(&self, paths: Vec<String>) {
        let _guard = lock(&self.request_lock);
        tracing::info!(count = paths.len(), "initializing extensions");
        *lock(&self.skip_default_adapters) = !paths.is_empty();
        self.engine.initialize_extensions(paths);
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    /// Discover tests. Returns `false` if a platform error stopped the discovery; the registrar has been told why.
    #[tracing::instrument(skip_all, fields(sources = payload.sources.len()))]
    pub fn discover_tests(&self, payload: DiscoveryRequestPayload, registrar: &dyn TestDiscoveryEventsRegistrar) -> bool {
        let _guard = lock(&self.request_lock);
        match self.discover_locked(payload, registrar) {
            Ok(outcome) => {
                tracing::debug!(state = %outcome.state, total = outcome.total_tests, "discovery returned");
                *lock(&self.last_discovery) = Some(outcome);
                true
            }
            Err(err) => {
                tracing::error!(kind = %err.kind(), error = %err, "discovery failed");
                registrar.log_error(&err.to_string());
                false
            }
        }
    }

    fn discover_locked(
        &self,
        payload: DiscoveryRequestPayload,
        registrar: &dyn TestDiscoveryEventsRegistrar,
    ) -> PlatformResult<DiscoveryOutcome> {
        let options = payload.test_platform_options.clone().unwrap_or_default();
        let criteria = self.discovery_criteria(payload, &options)?;
        let proxy = self.engine.discovery_manager(&criteria)?;
        proxy.initialize(*lock(&self.skip_default_adapters))?;

        let metrics: SharedMetrics = Arc::new(Mutex::new(MetricsCollection::new()));
        let request = DiscoveryRequest::new(criteria, proxy, Arc::clone(&metrics));
        let _disposing = DisposeOnDrop(request.as_ref());
        let _registration = DiscoveryRegistration::new(registrar, &request);

        self.current_discovery.publish(&request);
        let _published = Published {
            current: &self.current_discovery,
        };

        request.discover()?;
        if !request.wait_for_completion(self.config.completion_timeout)? {
            if let Err(err) = request.abort() {
                tracing::warn!(error = %err, "abort after discovery timeout failed");
            }
            return Err(PlatformError::timeout("discovery did not complete in time"));
        }

        Ok(DiscoveryOutcome {
            state: request.state(),
            total_tests: request.total_discovered(),
            metrics: self.reported_metrics(&metrics, options.collect_metrics),
        })
    }

    /// Cancel the discovery in flight, waiting briefly for one to be created.
    pub fn cancel_discovery(&self) {
        let timeout = self.config.request_creation_timeout;
        let started = Instant::now();
        let Some(request) = self.current_discovery.await_request(timeout) else {
            tracing::warn!("no discovery to cancel; dropping the request");
            return;
        };
        request.wait_until_started(timeout.saturating_sub(started.elapsed()));
        if let Err(err) = request.cancel() {
            tracing::warn!(error = %err, "cancel discovery failed");
        }
    }

    // ========================================================================
    // Runs
    // ========================================================================

    /// Run tests. `launcher` replaces the default host launcher (an IDE launching under a debugger).
    ///
    /// Returns `false` if a platform error stopped the run; the registrar has been told why.
    #[tracing::instrument(skip_all, fields(debug = payload.debugging_enabled))]
    pub fn run_tests(
        &self,
        payload: TestRunRequestPayload,
        launcher: Option<Arc<dyn TestHostLauncher>>,
        registrar: &dyn TestRunEventsRegistrar,
    ) -> bool {
        let _guard = lock(&self.request_lock);
        match self.run_locked(payload, launcher, registrar) {
            Ok(outcome) => {
                tracing::debug!(state = %outcome.state, "run returned");
                *lock(&self.last_run) = Some(outcome);
                true
            }
            Err(err) => {
                tracing::error!(kind = %err.kind(), error = %err, "test run failed");
                registrar.log_error(&err.to_string());
                false
            }
        }
    }

    fn run_locked(
        &self,
        payload: TestRunRequestPayload,
        launcher: Option<Arc<dyn TestHostLauncher>>,
        registrar: &dyn TestRunEventsRegistrar,
    ) -> PlatformResult<RunOutcome> {
        let options = payload.test_platform_options.clone().unwrap_or_default();
        let criteria = self.run_criteria(payload, &options, launcher)?;
        let proxy = self.engine.execution_manager(&criteria)?;
        proxy.initialize(*lock(&self.skip_default_adapters))?;

        let metrics: SharedMetrics = Arc::new(Mutex::new(MetricsCollection::new()));
        let request = TestRunRequest::new(criteria, proxy, Arc::clone(&metrics));
        let _disposing = DisposeOnDrop(request.as_ref());
        let _registration = RunRegistration::new(registrar, &request);

        self.current_run.publish(&request);
        let _published = Published {
            current: &self.current_run,
        };

        request.start()?;
        if !request.wait_for_completion(self.config.completion_timeout)? {
            if let Err(err) = request.abort() {
                tracing::warn!(error = %err, "abort after run timeout failed");
            }
            return Err(PlatformError::timeout("test run did not complete in time"));
        }

        let complete_args = request.complete_args();
        if let Some(args) = &complete_args {
            let run_settings = request.criteria().run_settings.as_deref();
            if let Err(err) = self.artifacts.record_run(run_settings, args, &request.run_attachments()) {
                tracing::warn!(error = %err, "cannot write run artifacts");
            }
        }

        Ok(RunOutcome {
            state: request.state(),
            complete_args,
            metrics: self.reported_metrics(&metrics, options.collect_metrics),
            elapsed: request.elapsed(),
        })
    }

    /// Cancel the run in flight, waiting briefly for one to be created.
    pub fn cancel_current_run(&self) {
        if let Some(request) = self.awaited_run("cancel") {
            if let Err(err) = request.cancel() {
                tracing::warn!(error = %err, "cancel run failed");
            }
        }
    }

    /// Abort the run in flight, waiting briefly for one to be created.
    pub fn abort_current_run(&self) {
        if let Some(request) = self.awaited_run("abort") {
            if let Err(err) = request.abort() {
                tracing::warn!(error = %err, "abort run failed");
            }
        }
    }

    fn awaited_run(&self, operation: &'static str) -> Option<Arc<TestRunRequest>> {
        let timeout = self.config.request_creation_timeout;
        let started = Instant::now();
        let Some(request) = self.current_run.await_request(timeout) else {
            tracing::warn!(operation, ?timeout, "no test run was created in time; dropping the request");
            return None;
        };
        request.wait_until_started(timeout.saturating_sub(started.elapsed()));
        Some(request)
    }

    // ========================================================================
    // Default option merge
    // ========================================================================

    fn discovery_criteria(
        &self,
        payload: DiscoveryRequestPayload,
        options: &TestPlatformOptions,
    ) -> PlatformResult<DiscoveryCriteria> {
        if payload.sources.is_empty() {
            return Err(PlatformError::settings("discovery request names no sources"));
        }
        let mut criteria = DiscoveryCriteria::new(payload.sources);
        criteria.run_settings = payload.run_settings;
        criteria.test_case_filter = options.test_case_filter.clone();
        criteria.frequency_of_discovered_tests_event = self.config.batch_size;
        Ok(criteria)
    }

    fn run_criteria(
        &self,
        payload: TestRunRequestPayload,
        options: &TestPlatformOptions,
        launcher: Option<Arc<dyn TestHostLauncher>>,
    ) -> PlatformResult<TestRunCriteria> {
        let target = match (payload.test_cases, payload.sources) {
            (Some(tests), _) if !tests.is_empty() => RunTarget::Tests(tests),
            (_, Some(sources)) if !sources.is_empty() => RunTarget::Sources(sources),
            _ => return Err(PlatformError::settings("run request names neither sources nor test cases")),
        };
        if matches!(target, RunTarget::Tests(_)) && options.test_case_filter.is_some() {
            return Err(PlatformError::settings(
                "a test case filter cannot be combined with specific test cases",
            ));
        }

        let mut criteria = match target {
            RunTarget::Sources(sources) => TestRunCriteria::with_sources(sources),
            RunTarget::Tests(tests) => TestRunCriteria::with_tests(tests),
        };
        criteria.run_settings = payload.run_settings;
        criteria.test_case_filter = options.test_case_filter.clone();
        criteria.frequency_of_run_stats_change_event = self.config.batch_size;
        criteria.keep_alive = payload.keep_alive;
        criteria.debugging_enabled = payload.debugging_enabled;
        criteria.test_host_launcher = launcher;
        Ok(criteria)
    }

    fn reported_metrics(&self, metrics: &SharedMetrics, requested: bool) -> MetricsCollection {
        if requested || self.config.collect_metrics {
            lock(metrics).clone()
        } else {
            MetricsCollection::new()
        }
    }
}
