//! Host lifecycle shared by the discovery and execution proxies.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use testplatform_core::protocol::{DEFAULT_PROTOCOL_VERSION, negotiate_version};
use testplatform_core::{Message, MessageTypeId, PlatformError, PlatformResult};

use crate::communication::{ChannelHandler, DataSerializer, MessageSink, SocketServer, serialize_payload};
use crate::config::PlatformConfig;
use crate::hosting::{ExitCallback, HostArguments, TestHostLauncher, TestHostManager};
use crate::sync::{Event, lock};

/// Owns the channel and the host process for one request.
///
/// Launch happens on the caller's thread; connection, version negotiation and initialization happen on the
/// proxy's setup thread through [`ProxyOperationManager::set_up_channel`].
pub struct ProxyOperationManager {
    config: PlatformConfig,
    serializer: Arc<dyn DataSerializer>,
    host: Arc<dyn TestHostManager>,
    extensions: Vec<String>,
    server: Mutex<Option<Arc<SocketServer>>>,
    negotiated_version: AtomicU32,
    version_received: Event,
    disconnected: Event,
    skip_default_adapters: AtomicBool,
    initialized: AtomicBool,
    closed: AtomicBool,
}

impl ProxyOperationManager {
    pub fn new(
        config: PlatformConfig,
        serializer: Arc<dyn DataSerializer>,
        host: Arc<dyn TestHostManager>,
        extensions: Vec<String>,
    ) -> Self {
        Self {
            config,
            serializer,
            host,
            extensions,
            server: Mutex::new(None),
            negotiated_version: AtomicU32::new(DEFAULT_PROTOCOL_VERSION),
            version_received: Event::new("protocol version"),
            disconnected: Event::new("host disconnect"),
            skip_default_adapters: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn serializer(&self) -> &dyn DataSerializer {
        self.serializer.as_ref()
    }

    pub fn initialize(&self, skip_default_adapters: bool) {
        self.skip_default_adapters.store(skip_default_adapters, Ordering::SeqCst);
        self.initialized.store(true, Ordering::SeqCst);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn protocol_version(&self) -> u32 {
        self.negotiated_version.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.server).as_ref().is_some_and(|s| s.is_connected())
    }

    fn server(&self) -> PlatformResult<Arc<SocketServer>> {
        lock(&self.server)
            .clone()
            .ok_or_else(|| PlatformError::invalid_operation("test host channel is not set up"))
    }

    /// Open the channel and launch the host. Returns the host process id.
    ///
    /// A `close` that lands while the host is being launched wins: the new host is cleaned up and the launch
    /// fails with [`PlatformError::Disposed`].
    pub fn launch(
        &self,
        channel: Arc<dyn ChannelHandler>,
        launcher: Option<&dyn TestHostLauncher>,
        on_exit: ExitCallback,
    ) -> PlatformResult<u32> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PlatformError::Disposed("ProxyOperationManager"));
        }
        let server = SocketServer::bind()?;
        server.accept_async(channel)?;
        let closed_meanwhile = {
            let mut slot = lock(&self.server);
            let closed = self.closed.load(Ordering::SeqCst);
            if !closed {
                *slot = Some(Arc::clone(&server));
            }
            closed
        };
        if closed_meanwhile {
            server.stop();
            return Err(PlatformError::Disposed("ProxyOperationManager"));
        }

        let mut arguments = HostArguments::new(server.endpoint().port(), std::process::id());
        if let Some(diag) = &self.config.diag_file {
            arguments = arguments.with_diag_file(host_diag_path(diag));
        }
        let start_info = self.host.compute_start_info(&BTreeMap::new(), &arguments)?;
        self.host.register_exit_notification(on_exit);
        let pid = self.host.launch(&start_info, launcher)?;
        if self.closed.load(Ordering::SeqCst) {
            // close() already cleaned up, before this host existed
            tracing::debug!(pid, "proxy closed while the test host was launching; stopping it");
            if let Err(err) = self.host.clean_up(Duration::ZERO) {
                tracing::warn!(pid, error = %err, "cannot stop test host launched after close");
            }
            return Err(PlatformError::Disposed("ProxyOperationManager"));
        }
        tracing::debug!(pid, port = arguments.port, "test host launched; waiting for it to connect");
        Ok(pid)
    }

    /// Wait for the host to connect, negotiate the protocol version, and send `initialize` unless there is
    /// nothing to load.
    pub fn set_up_channel(&self, initialize: MessageTypeId) -> PlatformResult<()> {
        let server = self.server()?;
        let timeout = self.config.connection_timeout;
        if !server.wait_for_client(timeout)? {
            return Err(PlatformError::timeout(format!(
                "test host did not connect within {} seconds",
                timeout.as_secs()
            )));
        }

        self.send(MessageTypeId::VersionCheck, &self.config.protocol_version)?;
        if !self.version_received.wait(Some(timeout))? {
            return Err(PlatformError::timeout("test host did not answer the protocol version check"));
        }

        let skip = self.skip_default_adapters.load(Ordering::SeqCst);
        if !(skip && self.extensions.is_empty()) {
            self.send(initialize, &self.extensions)?;
        }
        Ok(())
    }

    /// Record the host's answer to the version check.
    pub fn on_version_reply(&self, message: &Message) {
        match message.payload_as::<u32>() {
            Ok(theirs) => {
                let negotiated = negotiate_version(self.config.protocol_version, theirs);
                self.negotiated_version.store(negotiated, Ordering::SeqCst);
                tracing::debug!(ours = self.config.protocol_version, theirs, negotiated, "protocol negotiated");
            }
            Err(err) => {
                tracing::warn!(error = %err, "unreadable protocol version; keeping the default");
            }
        }
        self.version_received.set();
    }

    /// Serialize and send a message at the negotiated version.
    pub fn send<T: Serialize + ?Sized>(&self, id: MessageTypeId, payload: &T) -> PlatformResult<()> {
        let raw = serialize_payload(self.serializer.as_ref(), id, payload, self.protocol_version())?;
        self.server()?.send_raw(&raw)
    }

    pub fn send_empty(&self, id: MessageTypeId) -> PlatformResult<()> {
        let raw = self.serializer.serialize_message(id, None, self.protocol_version())?;
        self.server()?.send_raw(&raw)
    }

    pub fn mark_disconnected(&self) {
        self.disconnected.set();
    }

    /// Wait for the reader thread to drain the connection.
    pub fn wait_disconnected(&self, timeout: Duration) -> bool {
        self.disconnected.wait(Some(timeout)).unwrap_or(true)
    }

    /// End the session, stop the channel and the host. Tolerates a host that never connected.
    pub fn close(&self) -> PlatformResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.is_connected() {
            if let Err(err) = self.send_empty(MessageTypeId::SessionEnd) {
                tracing::debug!(error = %err, "session end not delivered");
            }
        }
        if let Some(server) = lock(&self.server).take() {
            server.stop();
        }
        self.version_received.dispose();
        self.disconnected.dispose();
        self.host.clean_up(self.config.host_exit_grace)
    }
}

/// `diag.log` -> `diag.host.log`.
fn host_diag_path(diag: &Path) -> PathBuf {
    let stem = diag.file_stem().and_then(|s| s.to_str()).unwrap_or("diag");
    let name = match diag.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}.host.{ext}"),
        None => format!("{stem}.host"),
    };
    diag.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_diag_path() {
        assert_eq!(host_diag_path(Path::new("/tmp/diag.log")), PathBuf::from("/tmp/diag.host.log"));
        assert_eq!(host_diag_path(Path::new("/tmp/trace")), PathBuf::from("/tmp/trace.host"));
    }
}
