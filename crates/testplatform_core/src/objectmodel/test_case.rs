//! Test cases, results and run statistics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A discovered test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestCase {
    pub id: Uuid,
    pub fully_qualified_name: String,
    #[serde(default)]
    pub display_name: String,
    /// Path of the test container (assembly, binary, script) this test lives in.
    pub source: String,
    /// Uri of the adapter that discovered the test and knows how to run it.
    pub executor_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
}

impl TestCase {
    /// Create a test case with a fresh id and a display name equal to the fully qualified name.
    pub fn new(
        fully_qualified_name: impl Into<String>,
        executor_uri: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        let fully_qualified_name = fully_qualified_name.into();
        Self {
            id: Uuid::new_v4(),
            display_name: fully_qualified_name.clone(),
            fully_qualified_name,
            source: source.into(),
            executor_uri: executor_uri.into(),
            code_file_path: None,
            line_number: None,
        }
    }
}

/// Outcome of one executed test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum TestOutcome {
    #[default]
    None,
    Passed,
    Failed,
    Skipped,
    NotFound,
}

/// Result of executing a test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestResult {
    pub test_case: TestCase,
    pub outcome: TestOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_stack_trace: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub messages: Vec<String>,
}

impl TestResult {
    pub fn new(test_case: TestCase, outcome: TestOutcome) -> Self {
        Self {
            test_case,
            outcome,
            error_message: None,
            error_stack_trace: None,
            duration_ms: 0,
            messages: Vec::new(),
        }
    }
}

/// Running totals for a test run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestRunStatistics {
    pub executed_tests: u64,
    #[serde(default)]
    pub stats: BTreeMap<TestOutcome, u64>,
}

impl TestRunStatistics {
    /// Record one result.
    pub fn record(&mut self, outcome: TestOutcome) {
        self.executed_tests += 1;
        *self.stats.entry(outcome).or_insert(0) += 1;
    }

    /// Count results with the given outcome.
    pub fn count(&self, outcome: TestOutcome) -> u64 {
        self.stats.get(&outcome).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_record() {
        let mut stats = TestRunStatistics::default();
        stats.record(TestOutcome::Passed);
        stats.record(TestOutcome::Passed);
        stats.record(TestOutcome::Failed);

        assert_eq!(stats.executed_tests, 3);
        assert_eq!(stats.count(TestOutcome::Passed), 2);
        assert_eq!(stats.count(TestOutcome::Failed), 1);
        assert_eq!(stats.count(TestOutcome::Skipped), 0);
    }

    #[test]
    fn test_statistics_serialize_outcome_keys() {
        let mut stats = TestRunStatistics::default();
        stats.record(TestOutcome::Skipped);
        let json = serde_json::to_string(&stats).unwrap();
        assert_eq!(json, r#"{"ExecutedTests":1,"Stats":{"Skipped":1}}"#);
        let back: TestRunStatistics = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stats);
    }

    #[test]
    fn test_case_new_uses_name_as_display_name() {
        let tc = TestCase::new("Suite.Adds", "executor://unit", "a.dll");
        assert_eq!(tc.display_name, "Suite.Adds");
        assert!(tc.code_file_path.is_none());
    }
}
