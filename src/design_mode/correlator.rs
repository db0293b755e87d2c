//! Single-slot request/response over the design-mode channel.
//!
//! The wire protocol carries no correlation id, so at most one launch may be outstanding: the slot lock is held
//! from the moment the request is sent until its acknowledgement arrives or the wait times out.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use testplatform_core::objectmodel::{CustomHostLaunchAckPayload, TestProcessStartInfo};
use testplatform_core::{MessageTypeId, PlatformError, PlatformResult};

use crate::communication::{DataSerializer, MessageSink, serialize_payload};
use crate::sync::lock;

pub struct HostLaunchCorrelator {
    sink: Arc<dyn MessageSink>,
    serializer: Arc<dyn DataSerializer>,
    protocol_version: AtomicU32,
    timeout: Duration,
    slot: Mutex<()>,
    pending: Mutex<Option<Sender<CustomHostLaunchAckPayload>>>,
}

impl HostLaunchCorrelator {
    pub fn new(
        sink: Arc<dyn MessageSink>,
        serializer: Arc<dyn DataSerializer>,
        protocol_version: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            sink,
            serializer,
            protocol_version: AtomicU32::new(protocol_version),
            timeout,
            slot: Mutex::new(()),
            pending: Mutex::new(None),
        }
    }

    /// Stamp later requests with the version negotiated with the client.
    pub fn set_protocol_version(&self, version: u32) {
        self.protocol_version.store(version, Ordering::SeqCst);
    }

    /// Ask the remote party to launch `start_info` and block until it reports the process id.
    ///
    /// A second caller blocks until the first one's acknowledgement arrives or times out.
    pub fn request_launch(&self, start_info: &TestProcessStartInfo) -> PlatformResult<u32> {
        let _slot = lock(&self.slot);

        let (tx, rx) = mpsc::channel();
        *lock(&self.pending) = Some(tx);

        let raw = serialize_payload(
            self.serializer.as_ref(),
            MessageTypeId::CustomTestHostLaunch,
            start_info,
            self.protocol_version.load(Ordering::SeqCst),
        );
        if let Err(err) = raw.and_then(|raw| self.sink.send_raw(&raw)) {
            lock(&self.pending).take();
            return Err(err);
        }
        tracing::debug!(file = %start_info.file_name, "custom host launch requested");

        let ack = match rx.recv_timeout(self.timeout) {
            Ok(ack) => ack,
            Err(RecvTimeoutError::Timeout) => {
                lock(&self.pending).take();
                return Err(PlatformError::timeout(format!(
                    "client did not acknowledge the host launch within {} seconds",
                    self.timeout.as_secs()
                )));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(PlatformError::channel("host launch abandoned"));
            }
        };

        if let Some(message) = ack.error_message {
            return Err(PlatformError::platform(format!("client failed to launch the test host: {message}")));
        }
        u32::try_from(ack.host_process_id)
            .map_err(|_| PlatformError::platform(format!("invalid host process id {}", ack.host_process_id)))
    }

    /// Route an acknowledgement to the waiting launch. Returns `false` when nothing was waiting.
    pub fn complete(&self, ack: CustomHostLaunchAckPayload) -> bool {
        let Some(tx) = lock(&self.pending).take() else {
            tracing::warn!(pid = ack.host_process_id, "unsolicited host launch acknowledgement dropped");
            return false;
        };
        tx.send(ack).is_ok()
    }

    /// Fail the outstanding launch, if any. Used when the channel goes away.
    pub fn abandon(&self) {
        lock(&self.pending).take();
    }
}
