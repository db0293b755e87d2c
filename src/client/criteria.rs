//! What a request asks a test host to do.

use std::fmt;
use std::sync::Arc;

use testplatform_core::objectmodel::{StartDiscoveryPayload, StartRunPayload, TestCase};

use crate::hosting::TestHostLauncher;

/// Criteria for one discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryCriteria {
    pub sources: Vec<String>,
    pub run_settings: Option<String>,
    pub test_case_filter: Option<String>,
    /// Tests per `TestFound` chunk
    pub frequency_of_discovered_tests_event: usize,
}

impl DiscoveryCriteria {
    pub fn new(sources: Vec<String>) -> Self {
        Self {
            sources,
            run_settings: None,
            test_case_filter: None,
            frequency_of_discovered_tests_event: 10,
        }
    }

    pub fn to_start_payload(&self) -> StartDiscoveryPayload {
        StartDiscoveryPayload {
            sources: self.sources.clone(),
            run_settings: self.run_settings.clone(),
            test_case_filter: self.test_case_filter.clone(),
            frequency_of_discovered_tests_event: self.frequency_of_discovered_tests_event,
        }
    }
}

/// Whether a run targets whole sources or specific tests.
#[derive(Debug, Clone, PartialEq)]
pub enum RunTarget {
    Sources(Vec<String>),
    Tests(Vec<TestCase>),
}

/// Criteria for one run.
#[derive(Clone)]
pub struct TestRunCriteria {
    pub target: RunTarget,
    pub run_settings: Option<String>,
    pub test_case_filter: Option<String>,
    /// Results per `StatsChange` chunk
    pub frequency_of_run_stats_change_event: usize,
    /// Keep the host alive for a follow-up request
    pub keep_alive: bool,
    pub debugging_enabled: bool,
    /// Launches the host instead of the default process launcher (an IDE, usually under a debugger)
    pub test_host_launcher: Option<Arc<dyn TestHostLauncher>>,
}

impl TestRunCriteria {
    pub fn with_sources(sources: Vec<String>) -> Self {
        Self::new(RunTarget::Sources(sources))
    }

    pub fn with_tests(tests: Vec<TestCase>) -> Self {
        Self::new(RunTarget::Tests(tests))
    }

    fn new(target: RunTarget) -> Self {
        Self {
            target,
            run_settings: None,
            test_case_filter: None,
            frequency_of_run_stats_change_event: 10,
            keep_alive: false,
            debugging_enabled: false,
            test_host_launcher: None,
        }
    }

    pub fn has_specific_tests(&self) -> bool {
        matches!(self.target, RunTarget::Tests(_))
    }

    /// Sources touched by the run, deduplicated in first-seen order.
    pub fn sources(&self) -> Vec<String> {
        match &self.target {
            RunTarget::Sources(sources) => sources.clone(),
            RunTarget::Tests(tests) => {
                let mut sources: Vec<String> = Vec::new();
                for test in tests {
                    if !sources.contains(&test.source) {
                        sources.push(test.source.clone());
                    }
                }
                sources
            }
        }
    }

    pub fn to_start_payload(&self) -> StartRunPayload {
        let (sources, tests) = match &self.target {
            RunTarget::Sources(sources) => (sources.clone(), Vec::new()),
            RunTarget::Tests(tests) => (Vec::new(), tests.clone()),
        };
        StartRunPayload {
            sources,
            tests,
            run_settings: self.run_settings.clone(),
            test_case_filter: self.test_case_filter.clone(),
            frequency_of_run_stats_change_event: self.frequency_of_run_stats_change_event,
            debugging_enabled: self.debugging_enabled,
        }
    }
}

impl fmt::Debug for TestRunCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestRunCriteria")
            .field("target", &self.target)
            .field("run_settings", &self.run_settings.is_some())
            .field("test_case_filter", &self.test_case_filter)
            .field("frequency_of_run_stats_change_event", &self.frequency_of_run_stats_change_event)
            .field("keep_alive", &self.keep_alive)
            .field("debugging_enabled", &self.debugging_enabled)
            .field("custom_launcher", &self.test_host_launcher.is_some())
            .finish()
    }
}
