//! The design-mode session: an IDE drives the controller over one socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

use testplatform_core::objectmodel::{CustomHostLaunchAckPayload, DiscoveryRequestPayload, TestRunRequestPayload};
use testplatform_core::protocol::{DEFAULT_PROTOCOL_VERSION, negotiate_version};
use testplatform_core::{Message, MessageTypeId, PlatformError, PlatformResult};

use super::correlator::HostLaunchCorrelator;
use super::launcher::DesignModeTestHostLauncher;
use super::registrars::{DesignModeDiscoveryRegistrar, DesignModeRunRegistrar, Relay};
use crate::client::TestRequestManager;
use crate::communication::{DataSerializer, JsonDataSerializer, MessageSink, SocketClient};
use crate::hosting::TestHostLauncher;

/// Whether the dispatch loop keeps reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Connection to an IDE plus the dispatch loop serving it.
pub struct DesignModeClient {
    connection: Arc<SocketClient>,
    serializer: Arc<dyn DataSerializer>,
    manager: Arc<TestRequestManager>,
    correlator: Arc<HostLaunchCorrelator>,
    version: Arc<AtomicU32>,
}

impl DesignModeClient {
    /// Connect to the IDE listening on `addr`.
    pub fn connect(addr: SocketAddr, manager: Arc<TestRequestManager>) -> PlatformResult<Self> {
        let config = manager.config();
        let connection = Arc::new(SocketClient::connect(addr, config.connection_timeout)?);
        let serializer: Arc<dyn DataSerializer> = Arc::new(JsonDataSerializer);
        let correlator = Arc::new(HostLaunchCorrelator::new(
            Arc::clone(&connection) as Arc<dyn MessageSink>,
            Arc::clone(&serializer),
            DEFAULT_PROTOCOL_VERSION,
            config.host_launch_timeout,
        ));
        Ok(Self {
            connection,
            serializer,
            manager,
            correlator,
            version: Arc::new(AtomicU32::new(DEFAULT_PROTOCOL_VERSION)),
        })
    }

    pub fn correlator(&self) -> &Arc<HostLaunchCorrelator> {
        &self.correlator
    }

    pub fn protocol_version(&self) -> u32 {
        self.version.load(Ordering::SeqCst)
    }

    fn relay(&self) -> Relay {
        Relay::new(
            Arc::clone(&self.connection) as Arc<dyn MessageSink>,
            Arc::clone(&self.serializer),
            Arc::clone(&self.version),
        )
    }

    /// Announce the session and serve the IDE until it ends the session or disconnects.
    pub fn run(&self) -> PlatformResult<()> {
        self.relay().send_empty(MessageTypeId::SessionConnected)?;
        tracing::info!("design-mode session connected");

        let result = loop {
            let raw = match self.connection.receive() {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    tracing::info!("client closed the connection");
                    break Ok(());
                }
                Err(err) => break Err(err),
            };
            match self.handle_message(&raw) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break Ok(()),
                Err(err) => tracing::warn!(error = %err, "cannot process message from client"),
            }
        };

        self.correlator.abandon();
        self.connection.shutdown();
        result
    }

    /// Dispatch one frame from the IDE. Long-running requests run on their own thread.
    pub fn handle_message(&self, raw: &str) -> PlatformResult<Flow> {
        let message = self.serializer.deserialize_message(raw)?;
        let Some(id) = message.type_id() else {
            tracing::warn!(message_type = %message.message_type, "unknown message from client ignored");
            return Ok(Flow::Continue);
        };
        tracing::debug!(message = %id, "message from client");

        match id {
            MessageTypeId::VersionCheck => self.negotiate(&message)?,
            MessageTypeId::ExtensionsInitialize => {
                let paths: Vec<String> = message.payload_as()?;
                self.manager.initialize_extensions(paths);
            }
            MessageTypeId::StartDiscovery => {
                let payload: DiscoveryRequestPayload = message.payload_as()?;
                let manager = Arc::clone(&self.manager);
                let registrar = DesignModeDiscoveryRegistrar::new(self.relay());
                spawn("testplatform-discover", move || {
                    manager.discover_tests(payload, &registrar);
                })?;
            }
            MessageTypeId::TestRunAllSourcesWithDefaultHost | MessageTypeId::TestRunSelectedTestCasesDefaultHost => {
                let payload: TestRunRequestPayload = message.payload_as()?;
                self.start_run(payload, None)?;
            }
            MessageTypeId::GetTestRunnerProcessStartInfoForRunAll
            | MessageTypeId::GetTestRunnerProcessStartInfoForRunSelected => {
                let payload: TestRunRequestPayload = message.payload_as()?;
                let launcher: Arc<dyn TestHostLauncher> = Arc::new(DesignModeTestHostLauncher::new(
                    Arc::clone(&self.correlator),
                    payload.debugging_enabled,
                ));
                self.start_run(payload, Some(launcher))?;
            }
            MessageTypeId::CustomTestHostLaunchCallback => {
                let ack: CustomHostLaunchAckPayload = message.payload_as()?;
                self.correlator.complete(ack);
            }
            MessageTypeId::CancelTestRun => {
                let manager = Arc::clone(&self.manager);
                spawn("testplatform-cancel", move || manager.cancel_current_run())?;
            }
            MessageTypeId::AbortTestRun => {
                let manager = Arc::clone(&self.manager);
                spawn("testplatform-abort", move || manager.abort_current_run())?;
            }
            MessageTypeId::CancelDiscovery => {
                let manager = Arc::clone(&self.manager);
                spawn("testplatform-cancel-discovery", move || manager.cancel_discovery())?;
            }
            MessageTypeId::SessionEnd => {
                tracing::info!("client ended the session");
                return Ok(Flow::Stop);
            }
            other => tracing::warn!(message = %other, "message not expected from client ignored"),
        }
        Ok(Flow::Continue)
    }

    fn negotiate(&self, message: &Message) -> PlatformResult<()> {
        let theirs: u32 = message.payload_as()?;
        let negotiated = negotiate_version(self.manager.config().protocol_version, theirs);
        self.version.store(negotiated, Ordering::SeqCst);
        self.correlator.set_protocol_version(negotiated);
        tracing::debug!(theirs, negotiated, "client protocol negotiated");
        self.relay().send(MessageTypeId::VersionCheck, &negotiated)
    }

    fn start_run(&self, payload: TestRunRequestPayload, launcher: Option<Arc<dyn TestHostLauncher>>) -> PlatformResult<()> {
        let manager = Arc::clone(&self.manager);
        let registrar = DesignModeRunRegistrar::new(self.relay());
        spawn("testplatform-run", move || {
            manager.run_tests(payload, launcher, &registrar);
        })
    }
}

fn spawn(name: &str, f: impl FnOnce() + Send + 'static) -> PlatformResult<()> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map(|_| ())
        .map_err(|e| PlatformError::platform(format!("cannot start {name} thread: {e}")))
}
