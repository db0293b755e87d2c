//! Discovery and runs through the real proxies and loopback channel, against a scripted in-process host.

mod support;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use testplatform::client::{
    DiscoveryCriteria, DiscoveryEventsListener, DiscoveryRequest, ProxyDiscoveryManager, ProxyExecutionManager,
    RequestState, TestEngine, TestRequestManager, TestRunCriteria, TestRunEventsListener, TestRunRequest,
};
use testplatform::communication::{ChannelHandler, JsonDataSerializer};
use testplatform::config::PlatformConfig;
use testplatform::hosting::{ExitCallback, TestHostLauncher, TestHostManager};
use testplatform::proxy::{HostDiscoveryProxy, HostExecutionProxy, HostFactory, ProcessTestEngine, ProxyOperationManager};
use testplatform_core::objectmodel::{
    DiscoveryRequestPayload, TestPlatformOptions, TestProcessStartInfo, TestRunRequestPayload,
};
use testplatform_core::{MetricsCollection, PlatformError, PlatformResult};

use support::{FakeHostManager, HostBehavior, RecordingDiscoveryRegistrar, RecordingLauncher, RecordingRunRegistrar};

fn config() -> PlatformConfig {
    PlatformConfig::default()
        .with_connection_timeout(Duration::from_secs(10))
        .with_completion_timeout(Some(Duration::from_secs(20)))
        .with_request_creation_timeout(Duration::from_secs(5))
}

fn manager_with(host: Arc<FakeHostManager>) -> Arc<TestRequestManager> {
    let factory: HostFactory = Arc::new(move |_config: &PlatformConfig| {
        let host: Arc<dyn TestHostManager> = Arc::clone(&host) as Arc<dyn TestHostManager>;
        Ok(host)
    });
    let engine: Arc<dyn TestEngine> = Arc::new(ProcessTestEngine::with_host_factory(config(), factory));
    Arc::new(TestRequestManager::new(engine, config()))
}

fn run_payload() -> TestRunRequestPayload {
    TestRunRequestPayload {
        sources: Some(vec!["a.dll".into()]),
        test_platform_options: Some(TestPlatformOptions {
            test_case_filter: None,
            collect_metrics: true,
        }),
        ..TestRunRequestPayload::default()
    }
}

#[test]
fn test_run_reports_progress_then_completes() {
    let host = Arc::new(FakeHostManager::new(HostBehavior::Complete));
    let manager = manager_with(Arc::clone(&host));
    let registrar = RecordingRunRegistrar::default();

    assert!(manager.run_tests(run_payload(), None, &registrar));

    let record = registrar.snapshot();
    assert!(record.errors.is_empty(), "{:?}", record.errors);
    assert_eq!((record.registered, record.unregistered), (1, 1));
    assert_eq!(record.completions.len(), 1);
    // the stats change plus the last chunk
    assert_eq!(record.results, 2);
    assert!(record.stats_changes >= 1);
    assert!(record.raw.iter().any(|raw| raw.contains("TestExecution.StatsChange")));

    let outcome = manager.last_run_outcome().unwrap();
    assert_eq!(outcome.state, RequestState::Completed);
    assert!(outcome.metrics.get("Host.AdapterCount").is_some());
    assert_eq!(host.launches.load(Ordering::SeqCst), 1);
}

#[test]
fn test_discovery_reports_every_test() {
    let host = Arc::new(FakeHostManager::new(HostBehavior::Complete));
    let manager = manager_with(host);
    let registrar = RecordingDiscoveryRegistrar::default();
    let payload = DiscoveryRequestPayload {
        sources: vec!["a.dll".into()],
        ..DiscoveryRequestPayload::default()
    };

    assert!(manager.discover_tests(payload, &registrar));

    let record = registrar.snapshot();
    assert_eq!(record.discovered.len(), 3);
    assert_eq!(record.completions.len(), 1);
    assert!(!record.completions[0].is_aborted);
    let outcome = manager.last_discovery_outcome().unwrap();
    assert_eq!(outcome.state, RequestState::Completed);
    assert_eq!(outcome.total_tests, 3);
}

#[test]
fn test_host_crash_aborts_the_run() {
    let host = Arc::new(FakeHostManager::new(HostBehavior::Crash));
    let manager = manager_with(host);
    let registrar = RecordingRunRegistrar::default();

    assert!(manager.run_tests(run_payload(), None, &registrar));

    let record = registrar.snapshot();
    assert_eq!(record.completions.len(), 1);
    assert!(record.completions[0].is_aborted);
    assert_eq!(manager.last_run_outcome().unwrap().state, RequestState::Aborted);
}

fn run_in_background(manager: &Arc<TestRequestManager>) -> mpsc::Receiver<(bool, support::RunRecord)> {
    let (tx, rx) = mpsc::channel();
    let manager = Arc::clone(manager);
    thread::spawn(move || {
        let registrar = RecordingRunRegistrar::default();
        let ok = manager.run_tests(run_payload(), None, &registrar);
        let _ = tx.send((ok, registrar.snapshot()));
    });
    rx
}

#[test]
fn test_cancel_reaches_the_host() {
    let host = Arc::new(FakeHostManager::new(HostBehavior::AwaitStop));
    let manager = manager_with(host);
    let done = run_in_background(&manager);

    manager.cancel_current_run();

    let (ok, record) = done.recv_timeout(Duration::from_secs(20)).unwrap();
    assert!(ok);
    assert_eq!(record.completions.len(), 1);
    assert!(record.completions[0].is_canceled);
    assert_eq!(manager.last_run_outcome().unwrap().state, RequestState::Canceled);
}

#[test]
fn test_abort_reaches_the_host() {
    let host = Arc::new(FakeHostManager::new(HostBehavior::AwaitStop));
    let manager = manager_with(host);
    let done = run_in_background(&manager);

    manager.abort_current_run();

    let (ok, record) = done.recv_timeout(Duration::from_secs(20)).unwrap();
    assert!(ok);
    assert_eq!(record.completions.len(), 1);
    assert!(record.completions[0].is_aborted);
    assert_eq!(manager.last_run_outcome().unwrap().state, RequestState::Aborted);
}

#[test]
fn test_custom_launcher_starts_the_host() {
    let host = Arc::new(FakeHostManager::new(HostBehavior::Complete));
    let manager = manager_with(Arc::clone(&host));
    let launcher = Arc::new(RecordingLauncher::default());
    let registrar = RecordingRunRegistrar::default();
    let payload = TestRunRequestPayload {
        debugging_enabled: true,
        ..run_payload()
    };

    let as_launcher: Arc<dyn TestHostLauncher> = Arc::clone(&launcher) as Arc<dyn TestHostLauncher>;
    assert!(manager.run_tests(payload, Some(as_launcher), &registrar));

    assert_eq!(launcher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(manager.last_run_outcome().unwrap().state, RequestState::Completed);
    let start_info = host.launched_with.lock().unwrap().clone().unwrap();
    assert!(start_info.arguments.contains("--role client"));
}

#[test]
fn test_consecutive_runs_each_get_a_host() {
    let host = Arc::new(FakeHostManager::new(HostBehavior::Complete));
    let manager = manager_with(Arc::clone(&host));

    for _ in 0..2 {
        let registrar = RecordingRunRegistrar::default();
        assert!(manager.run_tests(run_payload(), None, &registrar));
        assert_eq!(registrar.snapshot().completions.len(), 1);
    }
    assert_eq!(host.launches.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Stops racing the start
// ============================================================================

fn operation(host: &Arc<FakeHostManager>) -> ProxyOperationManager {
    ProxyOperationManager::new(
        config(),
        Arc::new(JsonDataSerializer),
        Arc::clone(host) as Arc<dyn TestHostManager>,
        Vec::new(),
    )
}

/// Holds the request between `InProgress` and the proxy call.
struct SlowStart(Duration);

impl TestRunEventsListener for SlowStart {
    fn on_run_start(&self, _criteria: &TestRunCriteria) {
        thread::sleep(self.0);
    }
}

impl DiscoveryEventsListener for SlowStart {
    fn on_discovery_start(&self, _criteria: &DiscoveryCriteria) {
        thread::sleep(self.0);
    }
}

#[test]
fn test_abort_while_the_run_is_starting_still_completes() {
    let host = Arc::new(FakeHostManager::new(HostBehavior::AwaitStop));
    let proxy: Arc<dyn ProxyExecutionManager> = Arc::new(HostExecutionProxy::new(operation(&host)));
    let request = TestRunRequest::new(
        TestRunCriteria::with_sources(vec!["a.dll".into()]),
        proxy,
        Arc::new(Mutex::new(MetricsCollection::new())),
    );
    request.subscribe(Arc::new(SlowStart(Duration::from_millis(400))));

    let starter = {
        let request = Arc::clone(&request);
        thread::spawn(move || request.start())
    };
    thread::sleep(Duration::from_millis(100));
    assert_eq!(request.state(), RequestState::InProgress);
    request.abort().unwrap();

    assert!(request.wait_for_completion(Some(Duration::from_secs(5))).unwrap());
    assert_eq!(starter.join().unwrap().unwrap(), 0);
    assert_eq!(request.state(), RequestState::Aborted);
    assert!(request.complete_args().unwrap().is_aborted);
    assert_eq!(host.launches.load(Ordering::SeqCst), 0);
    request.dispose();
}

#[test]
fn test_abort_while_discovery_is_starting_still_completes() {
    let host = Arc::new(FakeHostManager::new(HostBehavior::AwaitStop));
    let proxy: Arc<dyn ProxyDiscoveryManager> = Arc::new(HostDiscoveryProxy::new(operation(&host)));
    let request = DiscoveryRequest::new(
        DiscoveryCriteria::new(vec!["a.dll".into()]),
        proxy,
        Arc::new(Mutex::new(MetricsCollection::new())),
    );
    request.subscribe(Arc::new(SlowStart(Duration::from_millis(400))));

    let starter = {
        let request = Arc::clone(&request);
        thread::spawn(move || request.discover())
    };
    thread::sleep(Duration::from_millis(100));
    assert_eq!(request.state(), RequestState::InProgress);
    request.abort().unwrap();

    assert!(request.wait_for_completion(Some(Duration::from_secs(5))).unwrap());
    starter.join().unwrap().unwrap();
    assert_eq!(request.state(), RequestState::Aborted);
    assert_eq!(host.launches.load(Ordering::SeqCst), 0);
    request.dispose();
}

/// Blocks inside `launch_test_host` until released.
struct GatedLauncher {
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl TestHostLauncher for GatedLauncher {
    fn is_debug(&self) -> bool {
        false
    }

    fn launch_test_host(&self, _start_info: &TestProcessStartInfo) -> PlatformResult<u32> {
        let _ = self.entered.lock().unwrap().send(());
        let _ = self.release.lock().unwrap().recv();
        Ok(31)
    }
}

struct Ignore;

impl ChannelHandler for Ignore {
    fn on_message(&self, _raw: &str) {}

    fn on_disconnected(&self, _error: Option<&str>) {}
}

#[test]
fn test_host_launched_after_close_is_cleaned_up() {
    let host = Arc::new(FakeHostManager::new(HostBehavior::AwaitStop));
    let operation = Arc::new(operation(&host));
    let (entered_tx, entered) = mpsc::channel();
    let (release, release_rx) = mpsc::channel();
    let launcher = Arc::new(GatedLauncher {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    });

    let launching = {
        let (operation, launcher) = (Arc::clone(&operation), Arc::clone(&launcher));
        thread::spawn(move || {
            let on_exit: ExitCallback = Arc::new(|_code| {});
            operation.launch(Arc::new(Ignore), Some(&*launcher as &dyn TestHostLauncher), on_exit)
        })
    };
    entered.recv_timeout(Duration::from_secs(5)).unwrap();
    operation.close().unwrap();
    assert_eq!(host.cleanups.load(Ordering::SeqCst), 1);
    release.send(()).unwrap();

    let err = launching.join().unwrap().unwrap_err();
    assert!(matches!(err, PlatformError::Disposed(_)));
    assert_eq!(host.cleanups.load(Ordering::SeqCst), 2);
    assert!(!operation.is_connected());
}

#[test]
fn test_launch_after_close_is_refused() {
    let host = Arc::new(FakeHostManager::new(HostBehavior::AwaitStop));
    let operation = operation(&host);
    operation.close().unwrap();

    let on_exit: ExitCallback = Arc::new(|_code| {});
    let err = operation.launch(Arc::new(Ignore), None, on_exit).unwrap_err();
    assert!(matches!(err, PlatformError::Disposed(_)));
    assert_eq!(host.launches.load(Ordering::SeqCst), 0);
}

#[test]
fn test_default_run_writes_the_artifact_pair() {
    let host = Arc::new(FakeHostManager::new(HostBehavior::Complete));
    let manager = manager_with(host);
    let registrar = RecordingRunRegistrar::default();

    assert!(manager.run_tests(run_payload(), None, &registrar));

    let store = manager.artifacts();
    assert!(store.session_dir().starts_with(std::env::temp_dir()));
    let invocations = store.invocations().unwrap();
    assert_eq!(invocations.len(), 1);
    assert!(invocations[0].join(testplatform::artifacts::RUN_SETTINGS_FILE).exists());
    assert!(invocations[0].join(testplatform::artifacts::EXECUTION_COMPLETE_FILE).exists());
    store.clean_up().unwrap();
}
