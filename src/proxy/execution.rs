//! Execution proxy: drives one run in one test host.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use testplatform_core::objectmodel::{
    CustomHostLaunchAckPayload, StartRunPayload, TestMessageLevel, TestMessagePayload, TestProcessStartInfo,
    TestRunChangedEventArgs, TestRunCompleteEventArgs, TestRunCompletePayload,
};
use testplatform_core::{MessageTypeId, PlatformError, PlatformResult};

use super::operation::ProxyOperationManager;
use crate::client::{ProxyExecutionManager, RunEventsHandler, TestRunCriteria};
use crate::communication::{ChannelHandler, serialize_payload};
use crate::hosting::ExitCallback;
use crate::sync::lock;

/// How long an exited host's connection gets to drain before the run is declared aborted.
const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// The run's handler, plus a synthetic completion raised before `start_run` installed it.
#[derive(Default)]
struct HandlerSlot {
    handler: Option<Arc<dyn RunEventsHandler>>,
    pending: Option<TestRunCompleteEventArgs>,
}

struct ExecutionInner {
    operation: ProxyOperationManager,
    slot: Mutex<HandlerSlot>,
    completed: AtomicBool,
    started: AtomicBool,
    cancel_requested: AtomicBool,
    cancel_sent: AtomicBool,
    abort_requested: AtomicBool,
}

/// Process-backed [`ProxyExecutionManager`].
pub struct HostExecutionProxy {
    inner: Arc<ExecutionInner>,
}

impl HostExecutionProxy {
    pub fn new(operation: ProxyOperationManager) -> Self {
        Self {
            inner: Arc::new(ExecutionInner {
                operation,
                slot: Mutex::new(HandlerSlot::default()),
                completed: AtomicBool::new(false),
                started: AtomicBool::new(false),
                cancel_requested: AtomicBool::new(false),
                cancel_sent: AtomicBool::new(false),
                abort_requested: AtomicBool::new(false),
            }),
        }
    }

    pub fn protocol_version(&self) -> u32 {
        self.inner.operation.protocol_version()
    }
}

impl ProxyExecutionManager for HostExecutionProxy {
    fn initialize(&self, skip_default_adapters: bool) -> PlatformResult<()> {
        self.inner.operation.initialize(skip_default_adapters);
        Ok(())
    }

    /// Returns `0` when the run was aborted before a host was launched.
    fn start_run(&self, criteria: &TestRunCriteria, handler: Arc<dyn RunEventsHandler>) -> PlatformResult<u32> {
        let pending = {
            let mut slot = lock(&self.inner.slot);
            slot.handler = Some(handler);
            slot.pending.take()
        };
        if let Some(args) = pending {
            self.inner.complete_synthetic(args);
        }
        if self.inner.abort_requested.load(Ordering::SeqCst) {
            tracing::debug!("test run aborted before the test host was launched");
            return Ok(0);
        }

        let channel = Arc::clone(&self.inner) as Arc<dyn ChannelHandler>;
        let weak = Arc::downgrade(&self.inner);
        let on_exit: ExitCallback = Arc::new(move |code| {
            if let Some(inner) = weak.upgrade() {
                inner.on_host_exited(code);
            }
        });
        let pid = match self
            .inner
            .operation
            .launch(channel, criteria.test_host_launcher.as_deref(), on_exit)
        {
            Ok(pid) => pid,
            Err(err) if self.inner.completed.load(Ordering::SeqCst) => {
                tracing::debug!(error = %err, "test run completed while the test host was launching");
                return Ok(0);
            }
            Err(err) => return Err(err),
        };

        let start = if criteria.has_specific_tests() {
            MessageTypeId::StartTestExecutionWithTests
        } else {
            MessageTypeId::StartTestExecutionWithSources
        };
        let payload = criteria.to_start_payload();
        let inner = Arc::clone(&self.inner);
        thread::Builder::new()
            .name(format!("testplatform-run-{pid}"))
            .spawn(move || {
                if let Err(err) = inner.set_up_and_start(start, &payload) {
                    inner.fail(&format!("test run could not start: {err}"));
                }
            })
            .map_err(|e| PlatformError::platform(format!("cannot start run setup thread: {e}")))?;
        Ok(pid)
    }

    fn cancel(&self) -> PlatformResult<()> {
        self.inner.cancel_requested.store(true, Ordering::SeqCst);
        if self.inner.started.load(Ordering::SeqCst) {
            self.inner.send_cancel_once()?;
        }
        Ok(())
    }

    fn abort(&self) -> PlatformResult<()> {
        self.inner.abort_requested.store(true, Ordering::SeqCst);
        if self.inner.started.load(Ordering::SeqCst) {
            return self.inner.operation.send_empty(MessageTypeId::AbortTestRun);
        }
        self.inner.complete_synthetic(TestRunCompleteEventArgs::aborted(
            "test run aborted before the test host connected",
        ));
        Ok(())
    }

    fn close(&self) -> PlatformResult<()> {
        let result = self.inner.operation.close();
        lock(&self.inner.slot).handler.take();
        result
    }
}

impl ExecutionInner {
    fn handler(&self) -> Option<Arc<dyn RunEventsHandler>> {
        lock(&self.slot).handler.clone()
    }

    fn set_up_and_start(&self, start: MessageTypeId, payload: &StartRunPayload) -> PlatformResult<()> {
        self.operation.set_up_channel(MessageTypeId::ExecutionInitialize)?;
        if self.abort_requested.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.cancel_requested.load(Ordering::SeqCst) {
            self.complete_synthetic(TestRunCompleteEventArgs {
                is_canceled: true,
                ..TestRunCompleteEventArgs::default()
            });
            return Ok(());
        }

        self.operation.send(start, payload)?;
        self.started.store(true, Ordering::SeqCst);
        tracing::debug!(message = %start, "test run started in host");

        // A cancel that raced the start message.
        if self.cancel_requested.load(Ordering::SeqCst) {
            self.send_cancel_once()?;
        }
        Ok(())
    }

    fn send_cancel_once(&self) -> PlatformResult<()> {
        if self.cancel_sent.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.operation.send_empty(MessageTypeId::CancelTestRun)
    }

    /// Report an error and finish the run as aborted.
    fn fail(&self, message: &str) {
        if self.completed.load(Ordering::SeqCst) {
            tracing::debug!(message, "failure after completion ignored");
            return;
        }
        tracing::error!(message, "test run aborted");
        if let Some(handler) = self.handler() {
            handler.handle_log_message(TestMessageLevel::Error, message);
        }
        self.complete_synthetic(TestRunCompleteEventArgs::aborted(message));
    }

    /// Deliver a completion the host never sent, including its raw form for relays. Without a handler yet, the
    /// completion waits for `start_run` to install one.
    fn complete_synthetic(&self, args: TestRunCompleteEventArgs) {
        let handler = {
            let mut slot = lock(&self.slot);
            match slot.handler.clone() {
                Some(handler) => handler,
                None => {
                    slot.pending.get_or_insert(args);
                    return;
                }
            }
        };
        if self.completed.swap(true, Ordering::SeqCst) {
            return;
        }
        let payload = TestRunCompletePayload {
            test_run_complete_args: args.clone(),
            ..TestRunCompletePayload::default()
        };
        match serialize_payload(
            self.operation.serializer(),
            MessageTypeId::ExecutionComplete,
            &payload,
            self.operation.protocol_version(),
        ) {
            Ok(raw) => handler.handle_raw_message(&raw),
            Err(err) => tracing::warn!(error = %err, "cannot serialize synthetic completion"),
        }
        handler.handle_test_run_complete(args, None, Vec::new(), Vec::new());
    }

    fn on_host_exited(&self, code: Option<i32>) {
        if self.completed.load(Ordering::SeqCst) {
            return;
        }
        self.operation.wait_disconnected(EXIT_DRAIN_TIMEOUT);
        let code = code.map_or_else(|| "unknown".to_string(), |c| c.to_string());
        self.fail(&format!("test host process exited unexpectedly (exit code {code})"));
    }

    fn launch_debuggee(&self, start_info: &TestProcessStartInfo) -> CustomHostLaunchAckPayload {
        let result = match self.handler() {
            Some(handler) => handler.launch_process_with_debugger_attached(start_info),
            None => Err(PlatformError::invalid_operation("no run is attached")),
        };
        match result {
            Ok(pid) => CustomHostLaunchAckPayload {
                host_process_id: i64::from(pid),
                error_message: None,
            },
            Err(err) => CustomHostLaunchAckPayload {
                host_process_id: -1,
                error_message: Some(err.to_string()),
            },
        }
    }

    fn dispatch(&self, raw: &str) -> PlatformResult<()> {
        let message = self.operation.serializer().deserialize_message(raw)?;
        let Some(id) = message.type_id() else {
            tracing::debug!(message_type = %message.message_type, "unknown message from test host ignored");
            return Ok(());
        };
        match id {
            MessageTypeId::VersionCheck => self.operation.on_version_reply(&message),
            MessageTypeId::TestRunStatsChange => {
                let args: TestRunChangedEventArgs = message.payload_as()?;
                if let Some(handler) = self.handler() {
                    handler.handle_raw_message(raw);
                    handler.handle_test_run_stats_change(args);
                }
            }
            MessageTypeId::ExecutionComplete => {
                let payload: TestRunCompletePayload = message.payload_as()?;
                if self.completed.swap(true, Ordering::SeqCst) {
                    tracing::debug!("duplicate completion from test host ignored");
                    return Ok(());
                }
                if let Some(handler) = self.handler() {
                    handler.handle_raw_message(raw);
                    handler.handle_test_run_complete(
                        payload.test_run_complete_args,
                        payload.last_run_tests,
                        payload.run_attachments,
                        payload.executor_uris,
                    );
                }
            }
            MessageTypeId::TestMessage => {
                let payload: TestMessagePayload = message.payload_as()?;
                if let Some(handler) = self.handler() {
                    handler.handle_raw_message(raw);
                    handler.handle_log_message(payload.message_level, &payload.message);
                }
            }
            MessageTypeId::LaunchAdapterProcessWithDebuggerAttached => {
                let start_info: TestProcessStartInfo = message.payload_as()?;
                let ack = self.launch_debuggee(&start_info);
                self.operation
                    .send(MessageTypeId::LaunchAdapterProcessWithDebuggerAttachedCallback, &ack)?;
            }
            other => tracing::debug!(message = %other, "unexpected message from test host ignored"),
        }
        Ok(())
    }
}

impl ChannelHandler for ExecutionInner {
    fn on_message(&self, raw: &str) {
        if let Err(err) = self.dispatch(raw) {
            tracing::warn!(error = %err, "cannot process message from test host");
        }
    }

    fn on_disconnected(&self, error: Option<&str>) {
        self.operation.mark_disconnected();
        if !self.completed.load(Ordering::SeqCst) {
            let detail = error.unwrap_or("connection closed");
            self.fail(&format!("test host disconnected before the run completed: {detail}"));
        }
    }
}
