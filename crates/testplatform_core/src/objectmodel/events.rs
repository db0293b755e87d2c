//! Event arguments delivered to request listeners.

use serde::{Deserialize, Serialize};

use super::test_case::{TestCase, TestResult, TestRunStatistics};
use crate::metrics::MetricsCollection;

/// Severity of a session message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestMessageLevel {
    Informational,
    Warning,
    Error,
}

/// A chunk of progress from a running test host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestRunChangedEventArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<TestRunStatistics>,
    #[serde(default)]
    pub new_test_results: Vec<TestResult>,
    #[serde(default)]
    pub active_tests: Vec<TestCase>,
}

impl TestRunChangedEventArgs {
    pub fn is_empty(&self) -> bool {
        self.new_test_results.is_empty() && self.active_tests.is_empty() && self.stats.is_none()
    }
}

/// One file produced by a run (coverage report, log, screenshot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UriDataAttachment {
    pub uri: String,
    #[serde(default)]
    pub description: String,
}

/// Attachments grouped by the collector that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttachmentSet {
    pub uri: String,
    pub display_name: String,
    #[serde(default)]
    pub attachments: Vec<UriDataAttachment>,
}

/// Final outcome of a test run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestRunCompleteEventArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<TestRunStatistics>,
    pub is_canceled: bool,
    pub is_aborted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub attachment_sets: Vec<AttachmentSet>,
    #[serde(default)]
    pub elapsed_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsCollection>,
}

impl TestRunCompleteEventArgs {
    /// Completion synthesized by the controller when the host could not finish the run itself.
    pub fn aborted(error: impl Into<String>) -> Self {
        Self {
            is_aborted: true,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Final outcome of a discovery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DiscoveryCompleteEventArgs {
    /// Total tests discovered; `-1` when discovery was aborted.
    pub total_count: i64,
    pub is_aborted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsCollection>,
}

impl DiscoveryCompleteEventArgs {
    pub fn aborted() -> Self {
        Self {
            total_count: -1,
            is_aborted: true,
            metrics: None,
        }
    }
}
