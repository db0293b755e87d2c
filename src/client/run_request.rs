//! A single test run.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use testplatform_core::metrics::{REQUEST_STATE, TIME_TAKEN_IN_SEC, TOTAL_TESTS_RUN};
use testplatform_core::objectmodel::{
    AttachmentSet, TestMessageLevel, TestProcessStartInfo, TestRunChangedEventArgs, TestRunCompleteEventArgs,
};
use testplatform_core::{PlatformError, PlatformResult};

use super::SharedMetrics;
use super::criteria::TestRunCriteria;
use super::events::{ListenerId, Listeners, TestRunEventsListener};
use super::proxy::{ProxyExecutionManager, RunEventsHandler};
use super::request::{RequestCore, RequestState, close_logged};
use crate::sync::lock;

const KIND: &str = "TestRunRequest";

/// One run against one execution proxy.
///
/// Created by the orchestrator, shared with the proxy's reader thread as a [`RunEventsHandler`].
pub struct TestRunRequest {
    core: RequestCore<dyn ProxyExecutionManager>,
    criteria: TestRunCriteria,
    metrics: SharedMetrics,
    listeners: Listeners<dyn TestRunEventsListener>,
    host_process_id: Mutex<Option<u32>>,
    complete_args: Mutex<Option<TestRunCompleteEventArgs>>,
    run_attachments: Mutex<Vec<AttachmentSet>>,
}

impl TestRunRequest {
    pub fn new(
        criteria: TestRunCriteria,
        proxy: Arc<dyn ProxyExecutionManager>,
        metrics: SharedMetrics,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: RequestCore::new(KIND, proxy),
            criteria,
            metrics,
            listeners: Listeners::default(),
            host_process_id: Mutex::new(None),
            complete_args: Mutex::new(None),
            run_attachments: Mutex::new(Vec::new()),
        })
    }

    pub fn criteria(&self) -> &TestRunCriteria {
        &self.criteria
    }

    pub fn state(&self) -> RequestState {
        self.core.state()
    }

    /// Process id reported by the proxy when the run started.
    pub fn host_process_id(&self) -> Option<u32> {
        *lock(&self.host_process_id)
    }

    /// Completion arguments, once the run completed.
    pub fn complete_args(&self) -> Option<TestRunCompleteEventArgs> {
        lock(&self.complete_args).clone()
    }

    /// Attachments produced by data collectors for the whole run.
    pub fn run_attachments(&self) -> Vec<AttachmentSet> {
        lock(&self.run_attachments).clone()
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.core.elapsed()
    }

    pub fn subscribe(&self, listener: Arc<dyn TestRunEventsListener>) -> ListenerId {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Start the run. Only valid while pending; on failure the request returns to pending.
    pub fn start(self: &Arc<Self>) -> PlatformResult<u32> {
        let proxy = self.core.begin_start()?;
        tracing::info!(
            sources = self.criteria.sources().len(),
            specific_tests = self.criteria.has_specific_tests(),
            "starting test run"
        );
        self.listeners.notify("run_start", |l| l.on_run_start(&self.criteria));

        let handler: Arc<dyn RunEventsHandler> = Arc::clone(self) as Arc<dyn RunEventsHandler>;
        match proxy.start_run(&self.criteria, handler) {
            Ok(pid) => {
                *lock(&self.host_process_id) = Some(pid);
                Ok(pid)
            }
            Err(err) => {
                tracing::error!(error = %err, "test run failed to start");
                self.core.revert_start();
                Err(err)
            }
        }
    }

    /// Block until the request has been started. `false` on timeout.
    pub(crate) fn wait_until_started(&self, timeout: Duration) -> bool {
        self.core.wait_started(timeout)
    }

    /// Wait for completion. `Ok(true)` if completed (or never started), `Ok(false)` on timeout.
    pub fn wait_for_completion(&self, timeout: Option<Duration>) -> PlatformResult<bool> {
        self.core.wait(timeout)
    }

    /// Ask the host to stop cooperatively. Ignored unless the run is in progress.
    pub fn cancel(&self) -> PlatformResult<()> {
        match self.core.proxy_for("cancel")? {
            Some(proxy) => {
                tracing::info!("canceling test run");
                proxy.cancel()
            }
            None => Ok(()),
        }
    }

    /// Stop immediately. Ignored unless the run is in progress.
    pub fn abort(&self) -> PlatformResult<()> {
        match self.core.proxy_for("abort")? {
            Some(proxy) => {
                tracing::info!("aborting test run");
                proxy.abort()
            }
            None => Ok(()),
        }
    }

    /// Release the request, closing the proxy if completion never did. Idempotent.
    pub fn dispose(&self) {
        if let Some(proxy) = self.core.dispose() {
            close_logged(KIND, proxy.as_ref(), |p| p.close());
        }
    }

    fn record_metrics(&self, args: &TestRunCompleteEventArgs, state: RequestState) {
        let mut metrics = lock(&self.metrics);
        if let Some(host_metrics) = &args.metrics {
            metrics.merge(host_metrics);
        }
        if let Some(stats) = &args.stats {
            metrics.add(TOTAL_TESTS_RUN, stats.executed_tests);
        }
        if let Some(elapsed) = self.core.elapsed() {
            metrics.add(TIME_TAKEN_IN_SEC, elapsed.as_secs_f64());
        }
        metrics.add(REQUEST_STATE, state.as_str());
    }
}

impl RunEventsHandler for TestRunRequest {
    fn handle_test_run_stats_change(&self, args: TestRunChangedEventArgs) {
        let delivered = self
            .core
            .deliver_progress(|| self.listeners.notify("run_stats_change", |l| l.on_run_stats_change(&args)));
        if !delivered {
            tracing::debug!("progress after completion dropped");
        }
    }

    fn handle_test_run_complete(
        &self,
        args: TestRunCompleteEventArgs,
        last_chunk: Option<TestRunChangedEventArgs>,
        run_attachments: Vec<AttachmentSet>,
        executor_uris: Vec<String>,
    ) {
        let Some(proxy) = self.core.claim_completion() else {
            return;
        };

        if let Some(chunk) = last_chunk.as_ref().filter(|chunk| !chunk.is_empty()) {
            self.listeners.notify("run_stats_change", |l| l.on_run_stats_change(chunk));
        }

        let state = RequestState::from_completion(args.is_canceled, args.is_aborted);
        self.record_metrics(&args, state);

        if let Some(proxy) = proxy {
            close_logged(KIND, proxy.as_ref(), |p| p.close());
        }
        self.core.finish(state);
        *lock(&self.complete_args) = Some(args.clone());
        *lock(&self.run_attachments) = run_attachments;
        tracing::info!(%state, error = ?args.error, executors = executor_uris.len(), "test run finished");

        self.listeners
            .notify("run_complete", |l| l.on_run_complete(&args, last_chunk.as_ref()));
        self.core.signal_completion();
    }

    fn handle_log_message(&self, level: TestMessageLevel, message: &str) {
        self.listeners.notify("log_message", |l| l.on_log_message(level, message));
    }

    fn handle_raw_message(&self, raw: &str) {
        self.core
            .deliver_progress(|| self.listeners.notify("raw_message", |l| l.on_raw_message(raw)));
    }

    fn launch_process_with_debugger_attached(&self, start_info: &TestProcessStartInfo) -> PlatformResult<u32> {
        match &self.criteria.test_host_launcher {
            Some(launcher) if launcher.is_debug() => launcher.launch_test_host(start_info),
            _ => Err(PlatformError::invalid_operation(
                "run was not started with a debugging launcher",
            )),
        }
    }
}
