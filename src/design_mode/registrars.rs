//! Registrars that relay request events to the design-mode client unchanged.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use testplatform_core::objectmodel::{
    DiscoveryCompleteEventArgs, DiscoveryCompletePayload, TestCase, TestMessageLevel, TestMessagePayload,
    TestRunChangedEventArgs, TestRunCompleteEventArgs, TestRunCompletePayload,
};
use testplatform_core::{MessageTypeId, PlatformResult};

use crate::client::{
    DiscoveryEventsListener, DiscoveryRequest, ListenerId, TestDiscoveryEventsRegistrar, TestRunEventsListener,
    TestRunEventsRegistrar, TestRunRequest,
};
use crate::communication::{DataSerializer, MessageSink, serialize_payload};
use crate::sync::lock;

/// Outbound half of the design-mode connection.
#[derive(Clone)]
pub struct Relay {
    sink: Arc<dyn MessageSink>,
    serializer: Arc<dyn DataSerializer>,
    version: Arc<AtomicU32>,
}

impl Relay {
    pub fn new(
        sink: Arc<dyn MessageSink>,
        serializer: Arc<dyn DataSerializer>,
        version: Arc<AtomicU32>,
    ) -> Self {
        Self {
            sink,
            serializer,
            version,
        }
    }

    pub fn forward(&self, raw: &str) {
        if let Err(err) = self.sink.send_raw(raw) {
            tracing::warn!(error = %err, "cannot relay message to client");
        }
    }

    pub fn send<T: Serialize + ?Sized>(&self, id: MessageTypeId, payload: &T) -> PlatformResult<()> {
        let raw = serialize_payload(self.serializer.as_ref(), id, payload, self.version.load(Ordering::SeqCst))?;
        self.sink.send_raw(&raw)
    }

    pub fn send_empty(&self, id: MessageTypeId) -> PlatformResult<()> {
        let raw = self.serializer.serialize_message(id, None, self.version.load(Ordering::SeqCst))?;
        self.sink.send_raw(&raw)
    }

    fn send_logged<T: Serialize + ?Sized>(&self, id: MessageTypeId, payload: &T) {
        if let Err(err) = self.send(id, payload) {
            tracing::warn!(message = %id, error = %err, "cannot send message to client");
        }
    }

    fn error(&self, message: &str) {
        let payload = TestMessagePayload {
            message_level: TestMessageLevel::Error,
            message: message.to_string(),
        };
        self.send_logged(MessageTypeId::TestMessage, &payload);
    }
}

// ============================================================================
// Runs
// ============================================================================

struct RunRelay {
    relay: Relay,
    completed: Arc<AtomicBool>,
}

impl TestRunEventsListener for RunRelay {
    fn on_run_complete(&self, _args: &TestRunCompleteEventArgs, _last_chunk: Option<&TestRunChangedEventArgs>) {
        self.completed.store(true, Ordering::SeqCst);
    }

    fn on_raw_message(&self, raw: &str) {
        self.relay.forward(raw);
    }
}

/// One per run: relays raw host messages, and makes sure the client sees a completion even when the run failed.
pub struct DesignModeRunRegistrar {
    relay: Relay,
    completed: Arc<AtomicBool>,
    subscription: Mutex<Option<ListenerId>>,
}

impl DesignModeRunRegistrar {
    pub fn new(relay: Relay) -> Self {
        Self {
            relay,
            completed: Arc::new(AtomicBool::new(false)),
            subscription: Mutex::new(None),
        }
    }
}

impl TestRunEventsRegistrar for DesignModeRunRegistrar {
    fn register_test_run_events(&self, request: &Arc<TestRunRequest>) {
        let id = request.subscribe(Arc::new(RunRelay {
            relay: self.relay.clone(),
            completed: Arc::clone(&self.completed),
        }));
        *lock(&self.subscription) = Some(id);
    }

    fn unregister_test_run_events(&self, request: &Arc<TestRunRequest>) {
        if let Some(id) = lock(&self.subscription).take() {
            request.unsubscribe(id);
        }
    }

    fn log_error(&self, message: &str) {
        self.relay.error(message);
        if !self.completed.swap(true, Ordering::SeqCst) {
            let payload = TestRunCompletePayload {
                test_run_complete_args: TestRunCompleteEventArgs::aborted(message),
                ..TestRunCompletePayload::default()
            };
            self.relay.send_logged(MessageTypeId::ExecutionComplete, &payload);
        }
    }
}

// ============================================================================
// Discovery
// ============================================================================

struct DiscoveryRelay {
    relay: Relay,
    completed: Arc<AtomicBool>,
}

impl DiscoveryEventsListener for DiscoveryRelay {
    fn on_discovery_complete(&self, _args: &DiscoveryCompleteEventArgs, _last_chunk: &[TestCase]) {
        self.completed.store(true, Ordering::SeqCst);
    }

    fn on_raw_message(&self, raw: &str) {
        self.relay.forward(raw);
    }
}

pub struct DesignModeDiscoveryRegistrar {
    relay: Relay,
    completed: Arc<AtomicBool>,
    subscription: Mutex<Option<ListenerId>>,
}

impl DesignModeDiscoveryRegistrar {
    pub fn new(relay: Relay) -> Self {
        Self {
            relay,
            completed: Arc::new(AtomicBool::new(false)),
            subscription: Mutex::new(None),
        }
    }
}

impl TestDiscoveryEventsRegistrar for DesignModeDiscoveryRegistrar {
    fn register_discovery_events(&self, request: &Arc<DiscoveryRequest>) {
        let id = request.subscribe(Arc::new(DiscoveryRelay {
            relay: self.relay.clone(),
            completed: Arc::clone(&self.completed),
        }));
        *lock(&self.subscription) = Some(id);
    }

    fn unregister_discovery_events(&self, request: &Arc<DiscoveryRequest>) {
        if let Some(id) = lock(&self.subscription).take() {
            request.unsubscribe(id);
        }
    }

    fn log_error(&self, message: &str) {
        self.relay.error(message);
        if !self.completed.swap(true, Ordering::SeqCst) {
            let payload = DiscoveryCompletePayload {
                total_tests: -1,
                is_aborted: true,
                ..DiscoveryCompletePayload::default()
            };
            self.relay.send_logged(MessageTypeId::DiscoveryComplete, &payload);
        }
    }
}
