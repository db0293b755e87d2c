//! A single discovery.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use testplatform_core::PlatformResult;
use testplatform_core::metrics::{REQUEST_STATE, TIME_TAKEN_IN_SEC, TOTAL_TESTS_DISCOVERED};
use testplatform_core::objectmodel::{DiscoveryCompleteEventArgs, TestCase, TestMessageLevel};
use testplatform_core::protocol::supports_targeted_abort;

use super::SharedMetrics;
use super::criteria::DiscoveryCriteria;
use super::events::{DiscoveryEventsListener, ListenerId, Listeners};
use super::proxy::{DiscoveryEventsHandler, ProxyDiscoveryManager};
use super::request::{RequestCore, RequestState, close_logged};
use crate::sync::lock;

const KIND: &str = "DiscoveryRequest";

/// One discovery against one discovery proxy.
pub struct DiscoveryRequest {
    core: RequestCore<dyn ProxyDiscoveryManager>,
    criteria: DiscoveryCriteria,
    metrics: SharedMetrics,
    listeners: Listeners<dyn DiscoveryEventsListener>,
    total_discovered: Mutex<i64>,
}

impl DiscoveryRequest {
    pub fn new(criteria: DiscoveryCriteria, proxy: Arc<dyn ProxyDiscoveryManager>, metrics: SharedMetrics) -> Arc<Self> {
        Arc::new(Self {
            core: RequestCore::new(KIND, proxy),
            criteria,
            metrics,
            listeners: Listeners::default(),
            total_discovered: Mutex::new(0),
        })
    }

    pub fn criteria(&self) -> &DiscoveryCriteria {
        &self.criteria
    }

    pub fn state(&self) -> RequestState {
        self.core.state()
    }

    /// Total reported by the completion; `-1` for an aborted discovery.
    pub fn total_discovered(&self) -> i64 {
        *lock(&self.total_discovered)
    }

    pub fn subscribe(&self, listener: Arc<dyn DiscoveryEventsListener>) -> ListenerId {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Start discovery. Only valid while pending; on failure the request returns to pending.
    pub fn discover(self: &Arc<Self>) -> PlatformResult<()> {
        let proxy = self.core.begin_start()?;
        tracing::info!(sources = self.criteria.sources.len(), "starting discovery");
        self.listeners
            .notify("discovery_start", |l| l.on_discovery_start(&self.criteria));

        let handler = Arc::clone(self) as Arc<dyn DiscoveryEventsHandler>;
        proxy.discover(&self.criteria, handler).inspect_err(|err| {
            tracing::error!(error = %err, "discovery failed to start");
            self.core.revert_start();
        })
    }

    /// Block until the request has been started. `false` on timeout.
    pub(crate) fn wait_until_started(&self, timeout: Duration) -> bool {
        self.core.wait_started(timeout)
    }

    pub fn wait_for_completion(&self, timeout: Option<Duration>) -> PlatformResult<bool> {
        self.core.wait(timeout)
    }

    /// Ask the host to stop discovering. Ignored unless discovery is in progress.
    pub fn cancel(&self) -> PlatformResult<()> {
        match self.core.proxy_for("cancel")? {
            Some(proxy) => proxy.cancel(),
            None => Ok(()),
        }
    }

    /// Abort discovery. Hosts that negotiated a recent enough protocol abort just this request; older hosts are
    /// torn down.
    ///
    /// The version consulted is the one the proxy negotiated; before negotiation that is the default version, so
    /// an abort racing the handshake takes the teardown path.
    pub fn abort(self: &Arc<Self>) -> PlatformResult<()> {
        let Some(proxy) = self.core.proxy_for("abort")? else {
            return Ok(());
        };
        let version = proxy.protocol_version();
        if supports_targeted_abort(version) {
            tracing::info!(version, "aborting discovery for this request");
            proxy.abort_with_handler(Arc::clone(self) as Arc<dyn DiscoveryEventsHandler>)
        } else {
            tracing::info!(version, "aborting discovery host");
            proxy.abort()
        }
    }

    pub fn dispose(&self) {
        if let Some(proxy) = self.core.dispose() {
            close_logged(KIND, proxy.as_ref(), |p| p.close());
        }
    }
}

impl DiscoveryEventsHandler for DiscoveryRequest {
    fn handle_discovered_tests(&self, tests: Vec<TestCase>) {
        let delivered = self
            .core
            .deliver_progress(|| self.listeners.notify("discovered_tests", |l| l.on_discovered_tests(&tests)));
        if !delivered {
            tracing::debug!("tests discovered after completion dropped");
        }
    }

    fn handle_discovery_complete(&self, args: DiscoveryCompleteEventArgs, last_chunk: Vec<TestCase>) {
        let Some(proxy) = self.core.claim_completion() else {
            return;
        };

        if !last_chunk.is_empty() {
            self.listeners
                .notify("discovered_tests", |l| l.on_discovered_tests(&last_chunk));
        }

        let state = if args.is_aborted {
            RequestState::Aborted
        } else {
            RequestState::Completed
        };
        {
            let mut metrics = lock(&self.metrics);
            if let Some(host_metrics) = &args.metrics {
                metrics.merge(host_metrics);
            }
            metrics.add(TOTAL_TESTS_DISCOVERED, args.total_count);
            if let Some(elapsed) = self.core.elapsed() {
                metrics.add(TIME_TAKEN_IN_SEC, elapsed.as_secs_f64());
            }
            metrics.add(REQUEST_STATE, state.as_str());
        }
        *lock(&self.total_discovered) = args.total_count;

        if let Some(proxy) = proxy {
            close_logged(KIND, proxy.as_ref(), |p| p.close());
        }
        self.core.finish(state);
        tracing::info!(%state, total = args.total_count, "discovery finished");

        self.listeners
            .notify("discovery_complete", |l| l.on_discovery_complete(&args, &last_chunk));
        self.core.signal_completion();
    }

    fn handle_log_message(&self, level: TestMessageLevel, message: &str) {
        self.listeners.notify("log_message", |l| l.on_log_message(level, message));
    }

    fn handle_raw_message(&self, raw: &str) {
        self.core
            .deliver_progress(|| self.listeners.notify("raw_message", |l| l.on_raw_message(raw)));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use testplatform_core::MetricsCollection;
    use testplatform_core::protocol::{DEFAULT_PROTOCOL_VERSION, TARGETED_ABORT_MIN_VERSION};

    struct FakeDiscoveryProxy {
        version: AtomicU32,
        aborts: AtomicUsize,
        targeted_aborts: AtomicUsize,
        closes: AtomicUsize,
    }

    impl FakeDiscoveryProxy {
        fn with_version(version: u32) -> Arc<Self> {
            Arc::new(Self {
                version: AtomicU32::new(version),
                aborts: AtomicUsize::new(0),
                targeted_aborts: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            })
        }
    }

    impl ProxyDiscoveryManager for FakeDiscoveryProxy {
        fn initialize(&self, _skip_default_adapters: bool) -> PlatformResult<()> {
            Ok(())
        }

        fn discover(&self, _criteria: &DiscoveryCriteria, _handler: Arc<dyn DiscoveryEventsHandler>) -> PlatformResult<()> {
            Ok(())
        }

        fn cancel(&self) -> PlatformResult<()> {
            Ok(())
        }

        fn abort(&self) -> PlatformResult<()> {
            self.aborts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn abort_with_handler(&self, handler: Arc<dyn DiscoveryEventsHandler>) -> PlatformResult<()> {
            self.targeted_aborts.fetch_add(1, Ordering::SeqCst);
            handler.handle_discovery_complete(DiscoveryCompleteEventArgs::aborted(), Vec::new());
            Ok(())
        }

        fn protocol_version(&self) -> u32 {
            self.version.load(Ordering::SeqCst)
        }

        fn close(&self) -> PlatformResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn request(proxy: Arc<FakeDiscoveryProxy>) -> (Arc<DiscoveryRequest>, SharedMetrics) {
        let metrics: SharedMetrics = Arc::new(Mutex::new(MetricsCollection::new()));
        let request = DiscoveryRequest::new(DiscoveryCriteria::new(vec!["a.dll".into()]), proxy, metrics.clone());
        (request, metrics)
    }

    #[derive(Default)]
    struct Collector {
        tests: Mutex<Vec<String>>,
        completions: AtomicUsize,
    }

    impl DiscoveryEventsListener for Collector {
        fn on_discovered_tests(&self, tests: &[TestCase]) {
            self.tests
                .lock()
                .unwrap()
                .extend(tests.iter().map(|t| t.fully_qualified_name.clone()));
        }

        fn on_discovery_complete(&self, _args: &DiscoveryCompleteEventArgs, _last_chunk: &[TestCase]) {
            self.completions.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_abort_uses_targeted_path_on_new_hosts() {
        let proxy = FakeDiscoveryProxy::with_version(TARGETED_ABORT_MIN_VERSION);
        let (request, _) = request(proxy.clone());
        request.discover().unwrap();
        request.abort().unwrap();
        assert_eq!(proxy.targeted_aborts.load(Ordering::SeqCst), 1);
        assert_eq!(proxy.aborts.load(Ordering::SeqCst), 0);
        assert_eq!(request.state(), RequestState::Aborted);
        assert_eq!(request.total_discovered(), -1);
    }

    #[test]
    fn test_abort_tears_down_old_hosts() {
        let proxy = FakeDiscoveryProxy::with_version(DEFAULT_PROTOCOL_VERSION);
        let (request, _) = request(proxy.clone());
        request.discover().unwrap();
        request.abort().unwrap();
        assert_eq!(proxy.aborts.load(Ordering::SeqCst), 1);
        assert_eq!(proxy.targeted_aborts.load(Ordering::SeqCst), 0);
        assert_eq!(request.state(), RequestState::InProgress);
    }

    #[test]
    fn test_last_chunk_delivered_before_completion() {
        let proxy = FakeDiscoveryProxy::with_version(7);
        let (request, metrics) = request(proxy.clone());
        let collector = Arc::new(Collector::default());
        request.subscribe(collector.clone());
        request.discover().unwrap();

        request.handle_discovered_tests(vec![TestCase::new("A.one", "executor://x", "a.dll")]);
        request.handle_discovery_complete(
            DiscoveryCompleteEventArgs {
                total_count: 2,
                is_aborted: false,
                metrics: None,
            },
            vec![TestCase::new("A.two", "executor://x", "a.dll")],
        );
        request.handle_discovery_complete(DiscoveryCompleteEventArgs::aborted(), Vec::new());

        assert_eq!(*collector.tests.lock().unwrap(), vec!["A.one", "A.two"]);
        assert_eq!(collector.completions.load(Ordering::SeqCst), 1);
        assert_eq!(request.state(), RequestState::Completed);
        assert_eq!(proxy.closes.load(Ordering::SeqCst), 1);
        assert_eq!(
            metrics.lock().unwrap().get(TOTAL_TESTS_DISCOVERED),
            Some(&serde_json::json!(2))
        );
    }
}
