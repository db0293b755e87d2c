//! Console output for `discover` and `run`.

use std::sync::{Arc, Mutex};

use testplatform_core::objectmodel::{
    DiscoveryCompleteEventArgs, TestCase, TestMessageLevel, TestOutcome, TestResult, TestRunChangedEventArgs,
    TestRunCompleteEventArgs,
};

use crate::client::{
    DiscoveryEventsListener, DiscoveryRequest, ListenerId, TestDiscoveryEventsRegistrar, TestRunEventsListener,
    TestRunEventsRegistrar, TestRunRequest,
};
use crate::sync::lock;

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

fn print_log(level: TestMessageLevel, message: &str) {
    match level {
        TestMessageLevel::Informational => println!("{message}"),
        TestMessageLevel::Warning => eprintln!("{YELLOW}warning{RESET}: {message}"),
        TestMessageLevel::Error => eprintln!("{RED}error{RESET}: {message}"),
    }
}

// ============================================================================
// Run
// ============================================================================

/// Totals printed at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub other: u64,
    pub aborted: bool,
    pub canceled: bool,
    pub errors: Vec<String>,
}

impl RunSummary {
    fn record(&mut self, result: &TestResult) {
        match result.outcome {
            TestOutcome::Passed => self.passed += 1,
            TestOutcome::Failed => self.failed += 1,
            TestOutcome::Skipped => self.skipped += 1,
            TestOutcome::None | TestOutcome::NotFound => self.other += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.passed + self.failed + self.skipped + self.other
    }

    /// A run is successful when nothing failed and the host finished on its own.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && !self.aborted && self.errors.is_empty()
    }
}

struct RunPrinter {
    summary: Arc<Mutex<RunSummary>>,
    verbose: bool,
}

impl RunPrinter {
    fn print_result(&self, result: &TestResult) {
        match result.outcome {
            TestOutcome::Passed if self.verbose => {
                println!("  {GREEN}Passed{RESET} {} [{} ms]", result.test_case.display_name, result.duration_ms)
            }
            TestOutcome::Passed => {}
            TestOutcome::Failed => {
                println!("  {RED}Failed{RESET} {} [{} ms]", result.test_case.display_name, result.duration_ms);
                if let Some(message) = &result.error_message {
                    println!("    {message}");
                }
                if let Some(trace) = &result.error_stack_trace {
                    for line in trace.lines() {
                        println!("    {line}");
                    }
                }
            }
            TestOutcome::Skipped => println!("  {YELLOW}Skipped{RESET} {}", result.test_case.display_name),
            TestOutcome::None | TestOutcome::NotFound => {
                println!("  {YELLOW}{:?}{RESET} {}", result.outcome, result.test_case.display_name)
            }
        }
    }

    fn record_chunk(&self, chunk: &TestRunChangedEventArgs) {
        let mut summary = lock(&self.summary);
        for result in &chunk.new_test_results {
            summary.record(result);
            self.print_result(result);
        }
    }
}

impl TestRunEventsListener for RunPrinter {
    fn on_run_stats_change(&self, args: &TestRunChangedEventArgs) {
        self.record_chunk(args);
    }

    fn on_run_complete(&self, args: &TestRunCompleteEventArgs, last_chunk: Option<&TestRunChangedEventArgs>) {
        if let Some(chunk) = last_chunk {
            self.record_chunk(chunk);
        }
        let mut summary = lock(&self.summary);
        summary.aborted = args.is_aborted;
        summary.canceled = args.is_canceled;
        if let Some(error) = &args.error {
            eprintln!("{RED}error{RESET}: {error}");
        }
    }

    fn on_log_message(&self, level: TestMessageLevel, message: &str) {
        print_log(level, message);
    }
}

/// Prints results as they arrive and keeps the totals.
#[derive(Default)]
pub struct ConsoleRunReporter {
    summary: Arc<Mutex<RunSummary>>,
    subscription: Mutex<Option<ListenerId>>,
    verbose: bool,
}

impl ConsoleRunReporter {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            ..Self::default()
        }
    }

    pub fn summary(&self) -> RunSummary {
        lock(&self.summary).clone()
    }
}

impl TestRunEventsRegistrar for ConsoleRunReporter {
    fn register_test_run_events(&self, request: &Arc<TestRunRequest>) {
        let id = request.subscribe(Arc::new(RunPrinter {
            summary: Arc::clone(&self.summary),
            verbose: self.verbose,
        }));
        *lock(&self.subscription) = Some(id);
    }

    fn unregister_test_run_events(&self, request: &Arc<TestRunRequest>) {
        if let Some(id) = lock(&self.subscription).take() {
            request.unsubscribe(id);
        }
    }

    fn log_error(&self, message: &str) {
        eprintln!("{RED}error{RESET}: {message}");
        lock(&self.summary).errors.push(message.to_string());
    }
}

// ============================================================================
// Discovery
// ============================================================================

struct DiscoveryPrinter {
    found: Arc<Mutex<Vec<TestCase>>>,
}

impl DiscoveryPrinter {
    fn record(&self, tests: &[TestCase]) {
        let mut found = lock(&self.found);
        for test in tests {
            println!("  {}", test.fully_qualified_name);
            found.push(test.clone());
        }
    }
}

impl DiscoveryEventsListener for DiscoveryPrinter {
    fn on_discovered_tests(&self, tests: &[TestCase]) {
        self.record(tests);
    }

    fn on_discovery_complete(&self, args: &DiscoveryCompleteEventArgs, last_chunk: &[TestCase]) {
        self.record(last_chunk);
        if args.is_aborted {
            eprintln!("{RED}error{RESET}: discovery was aborted");
        }
    }

    fn on_log_message(&self, level: TestMessageLevel, message: &str) {
        print_log(level, message);
    }
}

/// Prints discovered tests by fully qualified name.
#[derive(Default)]
pub struct ConsoleDiscoveryReporter {
    found: Arc<Mutex<Vec<TestCase>>>,
    subscription: Mutex<Option<ListenerId>>,
    errors: Mutex<Vec<String>>,
}

impl ConsoleDiscoveryReporter {
    pub fn discovered(&self) -> Vec<TestCase> {
        lock(&self.found).clone()
    }

    pub fn has_errors(&self) -> bool {
        !lock(&self.errors).is_empty()
    }
}

impl TestDiscoveryEventsRegistrar for ConsoleDiscoveryReporter {
    fn register_discovery_events(&self, request: &Arc<DiscoveryRequest>) {
        let id = request.subscribe(Arc::new(DiscoveryPrinter {
            found: Arc::clone(&self.found),
        }));
        *lock(&self.subscription) = Some(id);
    }

    fn unregister_discovery_events(&self, request: &Arc<DiscoveryRequest>) {
        if let Some(id) = lock(&self.subscription).take() {
            request.unsubscribe(id);
        }
    }

    fn log_error(&self, message: &str) {
        eprintln!("{RED}error{RESET}: {message}");
        lock(&self.errors).push(message.to_string());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn result(name: &str, outcome: TestOutcome) -> TestResult {
        TestResult::new(TestCase::new(name, "executor://x", "a.dll"), outcome)
    }

    #[test]
    fn test_run_printer_counts_outcomes() {
        let summary = Arc::new(Mutex::new(RunSummary::default()));
        let printer = RunPrinter {
            summary: Arc::clone(&summary),
            verbose: false,
        };
        printer.on_run_stats_change(&TestRunChangedEventArgs {
            new_test_results: vec![result("A", TestOutcome::Passed), result("B", TestOutcome::Failed)],
            ..TestRunChangedEventArgs::default()
        });
        let last = TestRunChangedEventArgs {
            new_test_results: vec![result("C", TestOutcome::Skipped)],
            ..TestRunChangedEventArgs::default()
        };
        printer.on_run_complete(&TestRunCompleteEventArgs::default(), Some(&last));

        let summary = lock(&summary).clone();
        assert_eq!((summary.passed, summary.failed, summary.skipped), (1, 1, 1));
        assert_eq!(summary.total(), 3);
        assert!(!summary.is_success());
    }

    #[test]
    fn test_aborted_run_is_not_success() {
        let summary = RunSummary {
            passed: 4,
            aborted: true,
            ..RunSummary::default()
        };
        assert!(!summary.is_success());
        assert!(RunSummary::default().is_success());
    }

    #[test]
    fn test_reporter_log_error_marks_failure() {
        let reporter = ConsoleRunReporter::new(false);
        reporter.log_error("host did not connect");
        assert!(!reporter.summary().is_success());

        let discovery = ConsoleDiscoveryReporter::default();
        assert!(!discovery.has_errors());
        discovery.log_error("no sources");
        assert!(discovery.has_errors());
    }
}
