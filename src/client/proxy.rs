//! Seams between requests and the components that talk to a test host.
//!
//! A request owns exactly one proxy. The proxy reports back through the handler traits, which the requests
//! implement. [`TestEngine`] creates proxies for the orchestrator.

use std::sync::Arc;

use testplatform_core::PlatformResult;
use testplatform_core::objectmodel::{
    AttachmentSet, DiscoveryCompleteEventArgs, TestCase, TestMessageLevel, TestProcessStartInfo,
    TestRunChangedEventArgs, TestRunCompleteEventArgs,
};

use super::criteria::{DiscoveryCriteria, TestRunCriteria};

// ============================================================================
// Handlers (proxy -> request)
// ============================================================================

/// Discovery events coming back from a host.
pub trait DiscoveryEventsHandler: Send + Sync {
    fn handle_discovered_tests(&self, tests: Vec<TestCase>);

    /// Final event of a discovery. `last_chunk` holds tests not yet reported through `handle_discovered_tests`.
    fn handle_discovery_complete(&self, args: DiscoveryCompleteEventArgs, last_chunk: Vec<TestCase>);

    fn handle_log_message(&self, level: TestMessageLevel, message: &str);

    /// The serialized form of an event, for relays that forward the host's messages unchanged.
    fn handle_raw_message(&self, raw: &str);
}

/// Run events coming back from a host.
pub trait RunEventsHandler: Send + Sync {
    fn handle_test_run_stats_change(&self, args: TestRunChangedEventArgs);

    /// Final event of a run. `last_chunk` holds results not yet reported through `handle_test_run_stats_change`.
    fn handle_test_run_complete(
        &self,
        args: TestRunCompleteEventArgs,
        last_chunk: Option<TestRunChangedEventArgs>,
        run_attachments: Vec<AttachmentSet>,
        executor_uris: Vec<String>,
    );

    fn handle_log_message(&self, level: TestMessageLevel, message: &str);

    fn handle_raw_message(&self, raw: &str);

    /// The host asks for a child process (a test adapter) to be launched under the debugger.
    fn launch_process_with_debugger_attached(&self, start_info: &TestProcessStartInfo) -> PlatformResult<u32>;
}

// ============================================================================
// Proxies (request -> host)
// ============================================================================

/// Drives discovery in one test host.
pub trait ProxyDiscoveryManager: Send + Sync {
    /// Prepare the proxy. `skip_default_adapters` limits the host to explicitly configured extensions.
    fn initialize(&self, skip_default_adapters: bool) -> PlatformResult<()>;

    /// Start discovery; events arrive on `handler` from another thread.
    fn discover(&self, criteria: &DiscoveryCriteria, handler: Arc<dyn DiscoveryEventsHandler>) -> PlatformResult<()>;

    /// Ask the host to stop; it still reports a completion.
    fn cancel(&self) -> PlatformResult<()>;

    /// Stop immediately, tearing down the host.
    fn abort(&self) -> PlatformResult<()>;

    /// Abort only the discovery reporting to `handler`, leaving the host to finish cooperatively.
    fn abort_with_handler(&self, handler: Arc<dyn DiscoveryEventsHandler>) -> PlatformResult<()>;

    /// Protocol version negotiated with the host, or the default before negotiation.
    fn protocol_version(&self) -> u32;

    fn close(&self) -> PlatformResult<()>;
}

/// Drives a run in one test host.
pub trait ProxyExecutionManager: Send + Sync {
    fn initialize(&self, skip_default_adapters: bool) -> PlatformResult<()>;

    /// Launch the host and start the run. Returns the host process id.
    fn start_run(&self, criteria: &TestRunCriteria, handler: Arc<dyn RunEventsHandler>) -> PlatformResult<u32>;

    fn cancel(&self) -> PlatformResult<()>;

    fn abort(&self) -> PlatformResult<()>;

    fn close(&self) -> PlatformResult<()>;
}

/// Creates proxies for requests.
pub trait TestEngine: Send + Sync {
    fn discovery_manager(&self, criteria: &DiscoveryCriteria) -> PlatformResult<Arc<dyn ProxyDiscoveryManager>>;

    fn execution_manager(&self, criteria: &TestRunCriteria) -> PlatformResult<Arc<dyn ProxyExecutionManager>>;

    /// Extension assemblies subsequent hosts should load.
    fn initialize_extensions(&self, _paths: Vec<String>) {}
}
