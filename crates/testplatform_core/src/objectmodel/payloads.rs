//! Typed payloads for the message types in the registry.
//!
//! Client-facing payloads (`*RequestPayload`) arrive from a design-mode client; host-facing payloads
//! (`Start*Payload`) go to a test host; completion payloads come back from a test host and are relayed unchanged.

use serde::{Deserialize, Serialize};

use super::events::{AttachmentSet, TestMessageLevel, TestRunChangedEventArgs, TestRunCompleteEventArgs};
use super::test_case::TestCase;
use crate::metrics::MetricsCollection;

/// Knobs a client can set on a request in addition to run settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestPlatformOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_case_filter: Option<String>,
    #[serde(default)]
    pub collect_metrics: bool,
}

/// `TestDiscovery.Start` from a client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DiscoveryRequestPayload {
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_settings: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_platform_options: Option<TestPlatformOptions>,
}

/// Any of the four run messages from a client.
///
/// Exactly one of `sources` and `test_cases` should be set; the run-all variants use `sources`, the run-selected
/// variants use `test_cases`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestRunRequestPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_cases: Option<Vec<TestCase>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_settings: Option<String>,
    #[serde(default)]
    pub keep_alive: bool,
    #[serde(default)]
    pub debugging_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_platform_options: Option<TestPlatformOptions>,
}

/// `TestDiscovery.Start` sent to a test host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StartDiscoveryPayload {
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_settings: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_case_filter: Option<String>,
    pub frequency_of_discovered_tests_event: usize,
}

/// `TestExecution.StartWithSources` / `TestExecution.StartWithTests` sent to a test host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StartRunPayload {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tests: Vec<TestCase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_settings: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_case_filter: Option<String>,
    pub frequency_of_run_stats_change_event: usize,
    #[serde(default)]
    pub debugging_enabled: bool,
}

/// `TestDiscovery.TestFound` / `TestDiscovery.Completed` from a test host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DiscoveryCompletePayload {
    pub total_tests: i64,
    #[serde(default)]
    pub last_discovered_tests: Vec<TestCase>,
    pub is_aborted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsCollection>,
}

/// `TestExecution.Completed` from a test host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestRunCompletePayload {
    pub test_run_complete_args: TestRunCompleteEventArgs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_tests: Option<TestRunChangedEventArgs>,
    #[serde(default)]
    pub run_attachments: Vec<AttachmentSet>,
    #[serde(default)]
    pub executor_uris: Vec<String>,
}

/// `TestSession.Message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestMessagePayload {
    pub message_level: TestMessageLevel,
    pub message: String,
}

/// `TestExecution.CustomTestHostLaunchCallback` and `...LaunchAdapterProcessWithDebuggerAttachedCallback`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomHostLaunchAckPayload {
    pub host_process_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_request_defaults_when_fields_missing() {
        let payload: TestRunRequestPayload = serde_json::from_str(r#"{"Sources":["a.dll"]}"#).unwrap();
        assert_eq!(payload.sources.as_deref(), Some(&["a.dll".to_string()][..]));
        assert!(payload.test_cases.is_none());
        assert!(!payload.keep_alive);
        assert!(!payload.debugging_enabled);
    }

    #[test]
    fn test_ack_payload_with_error() {
        let ack: CustomHostLaunchAckPayload =
            serde_json::from_str(r#"{"HostProcessId":-1,"ErrorMessage":"debugger refused"}"#).unwrap();
        assert_eq!(ack.host_process_id, -1);
        assert_eq!(ack.error_message.as_deref(), Some("debugger refused"));
    }

    #[test]
    fn test_message_payload_level_spelling() {
        let msg = TestMessagePayload {
            message_level: TestMessageLevel::Warning,
            message: "slow adapter".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"MessageLevel":"Warning","Message":"slow adapter"}"#);
    }
}
