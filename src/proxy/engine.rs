//! The production [`TestEngine`]: one fresh host process per request.

use std::sync::{Arc, Mutex};

use testplatform_core::{PlatformError, PlatformResult};

use super::discovery::HostDiscoveryProxy;
use super::execution::HostExecutionProxy;
use super::operation::ProxyOperationManager;
use crate::client::{DiscoveryCriteria, ProxyDiscoveryManager, ProxyExecutionManager, TestEngine, TestRunCriteria};
use crate::communication::{DataSerializer, JsonDataSerializer};
use crate::config::PlatformConfig;
use crate::hosting::{DefaultTestHostManager, TestHostManager};
use crate::sync::lock;

/// Creates the host manager for one request.
pub type HostFactory = Arc<dyn Fn(&PlatformConfig) -> PlatformResult<Arc<dyn TestHostManager>> + Send + Sync>;

pub struct ProcessTestEngine {
    config: PlatformConfig,
    serializer: Arc<dyn DataSerializer>,
    extensions: Mutex<Vec<String>>,
    host_factory: HostFactory,
}

impl ProcessTestEngine {
    /// Engine launching hosts with [`DefaultTestHostManager`].
    pub fn new(config: PlatformConfig) -> Self {
        let factory: HostFactory = Arc::new(|config: &PlatformConfig| {
            let manager = DefaultTestHostManager::new(config.host.clone())?;
            Ok(Arc::new(manager) as Arc<dyn TestHostManager>)
        });
        Self::with_host_factory(config, factory)
    }

    pub fn with_host_factory(config: PlatformConfig, host_factory: HostFactory) -> Self {
        let extensions = config.extensions.clone();
        Self {
            config,
            serializer: Arc::new(JsonDataSerializer),
            extensions: Mutex::new(extensions),
            host_factory,
        }
    }

    pub fn extensions(&self) -> Vec<String> {
        lock(&self.extensions).clone()
    }

    fn operation(&self) -> PlatformResult<ProxyOperationManager> {
        let host = (self.host_factory)(&self.config)?;
        Ok(ProxyOperationManager::new(
            self.config.clone(),
            Arc::clone(&self.serializer),
            host,
            self.extensions(),
        ))
    }
}

fn require_sources(sources: &[String]) -> PlatformResult<()> {
    if sources.is_empty() {
        return Err(PlatformError::settings("no test sources were given"));
    }
    if let Some(blank) = sources.iter().find(|s| s.trim().is_empty()) {
        return Err(PlatformError::settings(format!("invalid test source '{blank}'")));
    }
    Ok(())
}

impl TestEngine for ProcessTestEngine {
    fn discovery_manager(&self, criteria: &DiscoveryCriteria) -> PlatformResult<Arc<dyn ProxyDiscoveryManager>> {
        require_sources(&criteria.sources)?;
        Ok(Arc::new(HostDiscoveryProxy::new(self.operation()?)))
    }

    fn execution_manager(&self, criteria: &TestRunCriteria) -> PlatformResult<Arc<dyn ProxyExecutionManager>> {
        require_sources(&criteria.sources())?;
        Ok(Arc::new(HostExecutionProxy::new(self.operation()?)))
    }

    fn initialize_extensions(&self, paths: Vec<String>) {
        let mut extensions = lock(&self.extensions);
        for path in paths {
            if !extensions.contains(&path) {
                extensions.push(path);
            }
        }
        tracing::debug!(count = extensions.len(), "extensions registered");
    }
}
