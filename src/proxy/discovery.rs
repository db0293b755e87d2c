//! Discovery proxy: drives one discovery in one test host.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use testplatform_core::objectmodel::{
    DiscoveryCompleteEventArgs, DiscoveryCompletePayload, StartDiscoveryPayload, TestCase, TestMessageLevel,
    TestMessagePayload,
};
use testplatform_core::{MessageTypeId, PlatformError, PlatformResult};

use super::operation::ProxyOperationManager;
use crate::client::{DiscoveryCriteria, DiscoveryEventsHandler, ProxyDiscoveryManager};
use crate::communication::{ChannelHandler, serialize_payload};
use crate::hosting::ExitCallback;
use crate::sync::lock;

const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// The discovery's handler, plus whether an abort arrived before `discover` installed it.
#[derive(Default)]
struct HandlerSlot {
    handler: Option<Arc<dyn DiscoveryEventsHandler>>,
    abort_pending: bool,
}

struct DiscoveryInner {
    operation: ProxyOperationManager,
    slot: Mutex<HandlerSlot>,
    completed: AtomicBool,
    started: AtomicBool,
    cancel_requested: AtomicBool,
    cancel_sent: AtomicBool,
}

/// Process-backed [`ProxyDiscoveryManager`].
pub struct HostDiscoveryProxy {
    inner: Arc<DiscoveryInner>,
}

impl HostDiscoveryProxy {
    pub fn new(operation: ProxyOperationManager) -> Self {
        Self {
            inner: Arc::new(DiscoveryInner {
                operation,
                slot: Mutex::new(HandlerSlot::default()),
                completed: AtomicBool::new(false),
                started: AtomicBool::new(false),
                cancel_requested: AtomicBool::new(false),
                cancel_sent: AtomicBool::new(false),
            }),
        }
    }
}

impl ProxyDiscoveryManager for HostDiscoveryProxy {
    fn initialize(&self, skip_default_adapters: bool) -> PlatformResult<()> {
        self.inner.operation.initialize(skip_default_adapters);
        Ok(())
    }

    fn discover(&self, criteria: &DiscoveryCriteria, handler: Arc<dyn DiscoveryEventsHandler>) -> PlatformResult<()> {
        let abort_pending = {
            let mut slot = lock(&self.inner.slot);
            slot.handler = Some(handler);
            std::mem::take(&mut slot.abort_pending)
        };
        if abort_pending {
            tracing::debug!("discovery aborted before the test host was launched");
            self.inner.complete_aborted();
            return Ok(());
        }

        let channel = Arc::clone(&self.inner) as Arc<dyn ChannelHandler>;
        let weak = Arc::downgrade(&self.inner);
        let on_exit: ExitCallback = Arc::new(move |code| {
            if let Some(inner) = weak.upgrade() {
                inner.on_host_exited(code);
            }
        });
        let pid = match self.inner.operation.launch(channel, None, on_exit) {
            Ok(pid) => pid,
            Err(err) if self.inner.completed.load(Ordering::SeqCst) => {
                tracing::debug!(error = %err, "discovery completed while the test host was launching");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let payload = criteria.to_start_payload();
        let inner = Arc::clone(&self.inner);
        thread::Builder::new()
            .name(format!("testplatform-discovery-{pid}"))
            .spawn(move || {
                if let Err(err) = inner.set_up_and_start(&payload) {
                    inner.fail(&format!("discovery could not start: {err}"));
                }
            })
            .map_err(|e| PlatformError::platform(format!("cannot start discovery setup thread: {e}")))?;
        Ok(())
    }

    fn cancel(&self) -> PlatformResult<()> {
        self.inner.cancel_requested.store(true, Ordering::SeqCst);
        if self.inner.started.load(Ordering::SeqCst) {
            self.inner.send_cancel_once()?;
        }
        Ok(())
    }

    fn abort(&self) -> PlatformResult<()> {
        self.inner.complete_aborted();
        Ok(())
    }

    fn abort_with_handler(&self, handler: Arc<dyn DiscoveryEventsHandler>) -> PlatformResult<()> {
        if self.inner.started.load(Ordering::SeqCst) {
            self.inner.send_cancel_once()?;
        }
        if self.inner.completed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.deliver_aborted(handler.as_ref());
        Ok(())
    }

    fn protocol_version(&self) -> u32 {
        self.inner.operation.protocol_version()
    }

    fn close(&self) -> PlatformResult<()> {
        let result = self.inner.operation.close();
        lock(&self.inner.slot).handler.take();
        result
    }
}

impl DiscoveryInner {
    fn handler(&self) -> Option<Arc<dyn DiscoveryEventsHandler>> {
        lock(&self.slot).handler.clone()
    }

    fn set_up_and_start(&self, payload: &StartDiscoveryPayload) -> PlatformResult<()> {
        self.operation.set_up_channel(MessageTypeId::DiscoveryInitialize)?;
        if self.completed.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.cancel_requested.load(Ordering::SeqCst) {
            self.complete_aborted();
            return Ok(());
        }

        self.operation.send(MessageTypeId::StartDiscovery, payload)?;
        self.started.store(true, Ordering::SeqCst);
        tracing::debug!(sources = payload.sources.len(), "discovery started in host");

        if self.cancel_requested.load(Ordering::SeqCst) {
            self.send_cancel_once()?;
        }
        Ok(())
    }

    fn send_cancel_once(&self) -> PlatformResult<()> {
        if self.cancel_sent.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.operation.send_empty(MessageTypeId::CancelDiscovery)
    }

    fn fail(&self, message: &str) {
        if self.completed.load(Ordering::SeqCst) {
            tracing::debug!(message, "failure after completion ignored");
            return;
        }
        tracing::error!(message, "discovery aborted");
        if let Some(handler) = self.handler() {
            handler.handle_log_message(TestMessageLevel::Error, message);
        }
        self.complete_aborted();
    }

    /// Without a handler yet, the abort waits for `discover` to install one.
    fn complete_aborted(&self) {
        let handler = {
            let mut slot = lock(&self.slot);
            match slot.handler.clone() {
                Some(handler) => handler,
                None => {
                    slot.abort_pending = true;
                    return;
                }
            }
        };
        if self.completed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.deliver_aborted(handler.as_ref());
    }

    fn deliver_aborted(&self, handler: &dyn DiscoveryEventsHandler) {
        let payload = DiscoveryCompletePayload {
            total_tests: -1,
            is_aborted: true,
            ..DiscoveryCompletePayload::default()
        };
        match serialize_payload(
            self.operation.serializer(),
            MessageTypeId::DiscoveryComplete,
            &payload,
            self.operation.protocol_version(),
        ) {
            Ok(raw) => handler.handle_raw_message(&raw),
            Err(err) => tracing::warn!(error = %err, "cannot serialize synthetic discovery completion"),
        }
        handler.handle_discovery_complete(DiscoveryCompleteEventArgs::aborted(), Vec::new());
    }

    fn on_host_exited(&self, code: Option<i32>) {
        if self.completed.load(Ordering::SeqCst) {
            return;
        }
        self.operation.wait_disconnected(EXIT_DRAIN_TIMEOUT);
        let code = code.map_or_else(|| "unknown".to_string(), |c| c.to_string());
        self.fail(&format!("test host process exited unexpectedly (exit code {code})"));
    }

    fn dispatch(&self, raw: &str) -> PlatformResult<()> {
        let message = self.operation.serializer().deserialize_message(raw)?;
        let Some(id) = message.type_id() else {
            tracing::debug!(message_type = %message.message_type, "unknown message from test host ignored");
            return Ok(());
        };
        match id {
            MessageTypeId::VersionCheck => self.operation.on_version_reply(&message),
            MessageTypeId::TestCasesFound => {
                let tests: Vec<TestCase> = message.payload_as()?;
                if let Some(handler) = self.handler() {
                    handler.handle_raw_message(raw);
                    handler.handle_discovered_tests(tests);
                }
            }
            MessageTypeId::DiscoveryComplete => {
                let payload: DiscoveryCompletePayload = message.payload_as()?;
                if self.completed.swap(true, Ordering::SeqCst) {
                    tracing::debug!("duplicate discovery completion ignored");
                    return Ok(());
                }
                if let Some(handler) = self.handler() {
                    handler.handle_raw_message(raw);
                    let args = DiscoveryCompleteEventArgs {
                        total_count: payload.total_tests,
                        is_aborted: payload.is_aborted,
                        metrics: payload.metrics,
                    };
                    handler.handle_discovery_complete(args, payload.last_discovered_tests);
                }
            }
            MessageTypeId::TestMessage => {
                let payload: TestMessagePayload = message.payload_as()?;
                if let Some(handler) = self.handler() {
                    handler.handle_raw_message(raw);
                    handler.handle_log_message(payload.message_level, &payload.message);
                }
            }
            other => tracing::debug!(message = %other, "unexpected message from test host ignored"),
        }
        Ok(())
    }
}

impl ChannelHandler for DiscoveryInner {
    fn on_message(&self, raw: &str) {
        if let Err(err) = self.dispatch(raw) {
            tracing::warn!(error = %err, "cannot process message from test host");
        }
    }

    fn on_disconnected(&self, error: Option<&str>) {
        self.operation.mark_disconnected();
        if !self.completed.load(Ordering::SeqCst) {
            let detail = error.unwrap_or("connection closed");
            self.fail(&format!("test host disconnected before discovery completed: {detail}"));
        }
    }
}
