//! Shared fakes for the integration tests.
//!
//! - [`FakeHostManager`] "launches" a test host as a thread that dials the controller's port and speaks the real
//!   wire protocol, so the proxies, channel and orchestrator run end to end without a worker binary.
//! - [`FakeEngine`] / [`FakeProxy`] stand in for the host-facing proxies when only the orchestrator is under test.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde::Serialize;

use testplatform::client::{
    DiscoveryCriteria, DiscoveryEventsListener, DiscoveryRequest, ListenerId, ProxyDiscoveryManager,
    ProxyExecutionManager, RunEventsHandler, TestDiscoveryEventsRegistrar, TestEngine, TestRunCriteria,
    TestRunEventsListener, TestRunEventsRegistrar, TestRunRequest,
};
use testplatform::communication::{DataSerializer, JsonDataSerializer, MessageSink, SocketClient, serialize_payload};
use testplatform::hosting::{ExitCallback, HostArguments, TestHostLauncher, TestHostManager};
use testplatform_core::objectmodel::{
    DiscoveryCompleteEventArgs, DiscoveryCompletePayload, TestCase, TestMessageLevel, TestOutcome,
    TestProcessStartInfo, TestResult, TestRunChangedEventArgs, TestRunCompleteEventArgs, TestRunCompletePayload,
    TestRunStatistics,
};
use testplatform_core::protocol::HIGHEST_SUPPORTED_VERSION;
use testplatform_core::{MessageTypeId, MetricsCollection, PlatformError, PlatformResult};

pub fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap()
}

pub fn passed(name: &str) -> TestResult {
    TestResult::new(TestCase::new(name, "executor://fake", "a.dll"), TestOutcome::Passed)
}

pub fn chunk(results: Vec<TestResult>) -> TestRunChangedEventArgs {
    let mut stats = TestRunStatistics::default();
    for result in &results {
        stats.record(result.outcome);
    }
    TestRunChangedEventArgs {
        stats: Some(stats),
        new_test_results: results,
        active_tests: Vec::new(),
    }
}

// ============================================================================
// Fake test host (real channel)
// ============================================================================

/// What the fake host does once it is asked to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostBehavior {
    /// Report one progress chunk, then complete.
    Complete,
    /// Wait for a cancel or abort, then complete accordingly.
    AwaitStop,
    /// Drop the connection without completing.
    Crash,
}

pub struct FakeHostManager {
    behavior: HostBehavior,
    version: u32,
    exit: Mutex<Option<ExitCallback>>,
    pub launches: AtomicUsize,
    pub cleanups: AtomicUsize,
    pub launched_with: Mutex<Option<TestProcessStartInfo>>,
}

impl FakeHostManager {
    pub fn new(behavior: HostBehavior) -> Self {
        Self::with_version(behavior, HIGHEST_SUPPORTED_VERSION)
    }

    pub fn with_version(behavior: HostBehavior, version: u32) -> Self {
        Self {
            behavior,
            version,
            exit: Mutex::new(None),
            launches: AtomicUsize::new(0),
            cleanups: AtomicUsize::new(0),
            launched_with: Mutex::new(None),
        }
    }
}

fn port_from(arguments: &str) -> PlatformResult<u16> {
    let mut words = arguments.split_whitespace();
    while let Some(word) = words.next() {
        if word == "--port" {
            return words
                .next()
                .and_then(|p| p.parse().ok())
                .ok_or_else(|| PlatformError::platform("bad --port"));
        }
    }
    Err(PlatformError::platform("no --port argument"))
}

impl TestHostManager for FakeHostManager {
    fn compute_start_info(
        &self,
        environment: &BTreeMap<String, String>,
        arguments: &HostArguments,
    ) -> PlatformResult<TestProcessStartInfo> {
        Ok(TestProcessStartInfo {
            file_name: "fakehost".into(),
            arguments: arguments.to_command_line(),
            working_directory: None,
            environment_variables: environment.clone(),
        })
    }

    fn launch(&self, start_info: &TestProcessStartInfo, launcher: Option<&dyn TestHostLauncher>) -> PlatformResult<u32> {
        let pid = match launcher {
            Some(launcher) => launcher.launch_test_host(start_info)?,
            None => 4242,
        };
        let port = port_from(&start_info.arguments)?;
        *lock(&self.launched_with) = Some(start_info.clone());
        self.launches.fetch_add(1, Ordering::SeqCst);
        let (behavior, version) = (self.behavior, self.version);
        thread::spawn(move || host_main(port, behavior, version));
        Ok(pid)
    }

    fn register_exit_notification(&self, callback: ExitCallback) {
        *lock(&self.exit) = Some(callback);
    }

    fn clean_up(&self, _grace: Duration) -> PlatformResult<()> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        lock(&self.exit).take();
        Ok(())
    }
}

struct HostConnection {
    client: SocketClient,
    serializer: JsonDataSerializer,
    version: u32,
}

impl HostConnection {
    fn send<T: Serialize + ?Sized>(&self, id: MessageTypeId, payload: &T) {
        let raw = serialize_payload(&self.serializer, id, payload, self.version).unwrap();
        let _ = self.client.send_raw(&raw);
    }
}

fn host_main(port: u16, behavior: HostBehavior, version: u32) {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let Ok(client) = SocketClient::connect(addr, Duration::from_secs(5)) else {
        return;
    };
    let host = HostConnection {
        client,
        serializer: JsonDataSerializer,
        version,
    };

    while let Ok(Some(raw)) = host.client.receive() {
        let message = host.serializer.deserialize_message(&raw).unwrap();
        match message.type_id() {
            Some(MessageTypeId::VersionCheck) => host.send(MessageTypeId::VersionCheck, &version),
            Some(MessageTypeId::StartTestExecutionWithSources | MessageTypeId::StartTestExecutionWithTests) => {
                match behavior {
                    HostBehavior::Complete => {
                        host.send(MessageTypeId::TestRunStatsChange, &chunk(vec![passed("A.One")]));
                        let mut metrics = MetricsCollection::new();
                        metrics.add("Host.AdapterCount", 1);
                        let complete = TestRunCompletePayload {
                            test_run_complete_args: TestRunCompleteEventArgs {
                                elapsed_time_ms: 12,
                                metrics: Some(metrics),
                                ..TestRunCompleteEventArgs::default()
                            },
                            last_run_tests: Some(chunk(vec![passed("A.Two")])),
                            ..TestRunCompletePayload::default()
                        };
                        host.send(MessageTypeId::ExecutionComplete, &complete);
                    }
                    HostBehavior::AwaitStop => {}
                    HostBehavior::Crash => {
                        host.client.shutdown();
                        return;
                    }
                }
            }
            Some(MessageTypeId::StartDiscovery) => match behavior {
                HostBehavior::Complete => {
                    let found = vec![
                        TestCase::new("A.One", "executor://fake", "a.dll"),
                        TestCase::new("A.Two", "executor://fake", "a.dll"),
                    ];
                    host.send(MessageTypeId::TestCasesFound, &found);
                    let complete = DiscoveryCompletePayload {
                        total_tests: 3,
                        last_discovered_tests: vec![TestCase::new("A.Three", "executor://fake", "a.dll")],
                        is_aborted: false,
                        metrics: None,
                    };
                    host.send(MessageTypeId::DiscoveryComplete, &complete);
                }
                HostBehavior::AwaitStop => {}
                HostBehavior::Crash => {
                    host.client.shutdown();
                    return;
                }
            },
            Some(MessageTypeId::CancelTestRun) => {
                let complete = TestRunCompletePayload {
                    test_run_complete_args: TestRunCompleteEventArgs {
                        is_canceled: true,
                        ..TestRunCompleteEventArgs::default()
                    },
                    ..TestRunCompletePayload::default()
                };
                host.send(MessageTypeId::ExecutionComplete, &complete);
            }
            Some(MessageTypeId::AbortTestRun) => {
                let complete = TestRunCompletePayload {
                    test_run_complete_args: TestRunCompleteEventArgs {
                        is_aborted: true,
                        ..TestRunCompleteEventArgs::default()
                    },
                    ..TestRunCompletePayload::default()
                };
                host.send(MessageTypeId::ExecutionComplete, &complete);
            }
            Some(MessageTypeId::CancelDiscovery) => {
                let complete = DiscoveryCompletePayload {
                    total_tests: -1,
                    is_aborted: true,
                    ..DiscoveryCompletePayload::default()
                };
                host.send(MessageTypeId::DiscoveryComplete, &complete);
            }
            Some(MessageTypeId::SessionEnd) => return,
            _ => {}
        }
    }
}

/// A launcher that records the start info and reports a fixed pid.
#[derive(Default)]
pub struct RecordingLauncher {
    pub calls: AtomicUsize,
}

impl TestHostLauncher for RecordingLauncher {
    fn is_debug(&self) -> bool {
        true
    }

    fn launch_test_host(&self, _start_info: &TestProcessStartInfo) -> PlatformResult<u32> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(777)
    }
}

// ============================================================================
// Fake proxies (no channel)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyMode {
    Complete,
    AwaitStop,
    /// Never completes; abort fails as if the channel were gone.
    BrokenChannel,
}

#[derive(Default)]
pub struct Concurrency {
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub started: AtomicUsize,
}

pub struct FakeProxy {
    mode: ProxyMode,
    concurrency: Arc<Concurrency>,
    handler: Mutex<Option<Arc<dyn RunEventsHandler>>>,
    pub cancels: AtomicUsize,
    pub aborts: AtomicUsize,
    pub closes: AtomicUsize,
}

impl FakeProxy {
    fn finish(&self, args: TestRunCompleteEventArgs) {
        let Some(handler) = lock(&self.handler).clone() else {
            return;
        };
        let concurrency = Arc::clone(&self.concurrency);
        thread::spawn(move || {
            concurrency.active.fetch_sub(1, Ordering::SeqCst);
            handler.handle_test_run_complete(args, None, Vec::new(), Vec::new());
        });
    }
}

impl ProxyExecutionManager for FakeProxy {
    fn initialize(&self, _skip_default_adapters: bool) -> PlatformResult<()> {
        Ok(())
    }

    fn start_run(&self, _criteria: &TestRunCriteria, handler: Arc<dyn RunEventsHandler>) -> PlatformResult<u32> {
        *lock(&self.handler) = Some(Arc::clone(&handler));
        let now = self.concurrency.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.concurrency.max_active.fetch_max(now, Ordering::SeqCst);
        self.concurrency.started.fetch_add(1, Ordering::SeqCst);

        if self.mode == ProxyMode::Complete {
            let concurrency = Arc::clone(&self.concurrency);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                handler.handle_test_run_stats_change(chunk(vec![passed("A.One")]));
                concurrency.active.fetch_sub(1, Ordering::SeqCst);
                handler.handle_test_run_complete(TestRunCompleteEventArgs::default(), None, Vec::new(), Vec::new());
            });
        }
        Ok(1000)
    }

    fn cancel(&self) -> PlatformResult<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.finish(TestRunCompleteEventArgs {
            is_canceled: true,
            ..TestRunCompleteEventArgs::default()
        });
        Ok(())
    }

    fn abort(&self) -> PlatformResult<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        if self.mode == ProxyMode::BrokenChannel {
            return Err(PlatformError::channel("connection reset"));
        }
        self.finish(TestRunCompleteEventArgs {
            is_aborted: true,
            ..TestRunCompleteEventArgs::default()
        });
        Ok(())
    }

    fn close(&self) -> PlatformResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        lock(&self.handler).take();
        Ok(())
    }
}

/// Hands out [`FakeProxy`]s, optionally after a delay to widen the window before a request exists.
pub struct FakeEngine {
    mode: ProxyMode,
    delay: Duration,
    pub concurrency: Arc<Concurrency>,
    pub proxies: Mutex<Vec<Arc<FakeProxy>>>,
}

impl FakeEngine {
    pub fn new(mode: ProxyMode) -> Self {
        Self::with_delay(mode, Duration::ZERO)
    }

    pub fn with_delay(mode: ProxyMode, delay: Duration) -> Self {
        Self {
            mode,
            delay,
            concurrency: Arc::new(Concurrency::default()),
            proxies: Mutex::new(Vec::new()),
        }
    }

    pub fn proxy(&self, index: usize) -> Arc<FakeProxy> {
        Arc::clone(&lock(&self.proxies)[index])
    }
}

impl TestEngine for FakeEngine {
    fn discovery_manager(&self, _criteria: &DiscoveryCriteria) -> PlatformResult<Arc<dyn ProxyDiscoveryManager>> {
        Err(PlatformError::settings("discovery is not scripted"))
    }

    fn execution_manager(&self, _criteria: &TestRunCriteria) -> PlatformResult<Arc<dyn ProxyExecutionManager>> {
        thread::sleep(self.delay);
        let proxy = Arc::new(FakeProxy {
            mode: self.mode,
            concurrency: Arc::clone(&self.concurrency),
            handler: Mutex::new(None),
            cancels: AtomicUsize::new(0),
            aborts: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        });
        lock(&self.proxies).push(Arc::clone(&proxy));
        Ok(proxy)
    }
}

// ============================================================================
// Recording registrars
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct RunRecord {
    pub registered: usize,
    pub unregistered: usize,
    pub stats_changes: usize,
    pub results: usize,
    pub completions: Vec<TestRunCompleteEventArgs>,
    pub raw: Vec<String>,
    pub logs: Vec<(TestMessageLevel, String)>,
    pub errors: Vec<String>,
}

struct RunRecorder(Arc<Mutex<RunRecord>>);

impl TestRunEventsListener for RunRecorder {
    fn on_run_stats_change(&self, args: &TestRunChangedEventArgs) {
        let mut record = lock(&self.0);
        record.stats_changes += 1;
        record.results += args.new_test_results.len();
    }

    fn on_run_complete(&self, args: &TestRunCompleteEventArgs, last_chunk: Option<&TestRunChangedEventArgs>) {
        let mut record = lock(&self.0);
        record.results += last_chunk.map_or(0, |c| c.new_test_results.len());
        record.completions.push(args.clone());
    }

    fn on_log_message(&self, level: TestMessageLevel, message: &str) {
        lock(&self.0).logs.push((level, message.to_string()));
    }

    fn on_raw_message(&self, raw: &str) {
        lock(&self.0).raw.push(raw.to_string());
    }
}

#[derive(Default)]
pub struct RecordingRunRegistrar {
    pub record: Arc<Mutex<RunRecord>>,
    subscription: Mutex<Option<ListenerId>>,
}

impl RecordingRunRegistrar {
    pub fn snapshot(&self) -> RunRecord {
        lock(&self.record).clone()
    }
}

impl TestRunEventsRegistrar for RecordingRunRegistrar {
    fn register_test_run_events(&self, request: &Arc<TestRunRequest>) {
        lock(&self.record).registered += 1;
        let id = request.subscribe(Arc::new(RunRecorder(Arc::clone(&self.record))));
        *lock(&self.subscription) = Some(id);
    }

    fn unregister_test_run_events(&self, request: &Arc<TestRunRequest>) {
        lock(&self.record).unregistered += 1;
        if let Some(id) = lock(&self.subscription).take() {
            request.unsubscribe(id);
        }
    }

    fn log_error(&self, message: &str) {
        lock(&self.record).errors.push(message.to_string());
    }
}

#[derive(Debug, Default, Clone)]
pub struct DiscoveryRecord {
    pub discovered: Vec<TestCase>,
    pub completions: Vec<DiscoveryCompleteEventArgs>,
    pub errors: Vec<String>,
}

struct DiscoveryRecorder(Arc<Mutex<DiscoveryRecord>>);

impl DiscoveryEventsListener for DiscoveryRecorder {
    fn on_discovered_tests(&self, tests: &[TestCase]) {
        lock(&self.0).discovered.extend_from_slice(tests);
    }

    fn on_discovery_complete(&self, args: &DiscoveryCompleteEventArgs, last_chunk: &[TestCase]) {
        let mut record = lock(&self.0);
        record.discovered.extend_from_slice(last_chunk);
        record.completions.push(args.clone());
    }
}

#[derive(Default)]
pub struct RecordingDiscoveryRegistrar {
    pub record: Arc<Mutex<DiscoveryRecord>>,
    subscription: Mutex<Option<ListenerId>>,
}

impl RecordingDiscoveryRegistrar {
    pub fn snapshot(&self) -> DiscoveryRecord {
        lock(&self.record).clone()
    }
}

impl TestDiscoveryEventsRegistrar for RecordingDiscoveryRegistrar {
    fn register_discovery_events(&self, request: &Arc<DiscoveryRequest>) {
        let id = request.subscribe(Arc::new(DiscoveryRecorder(Arc::clone(&self.record))));
        *lock(&self.subscription) = Some(id);
    }

    fn unregister_discovery_events(&self, request: &Arc<DiscoveryRequest>) {
        if let Some(id) = lock(&self.subscription).take() {
            request.unsubscribe(id);
        }
    }

    fn log_error(&self, message: &str) {
        lock(&self.record).errors.push(message.to_string());
    }
}
