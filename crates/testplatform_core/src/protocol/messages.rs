//! Message-type registry.
//!
//! This module centralizes every wire message spelling so the proxies and the design-mode client don't need
//! stringly-typed comparisons.

use super::registry::{Direction, MessageInfo};

/// Stable identifier for supported message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageTypeId {
    // Session control
    VersionCheck,
    SessionConnected,
    SessionEnd,
    TestMessage,
    ExtensionsInitialize,

    // Discovery
    DiscoveryInitialize,
    StartDiscovery,
    TestCasesFound,
    DiscoveryComplete,
    CancelDiscovery,

    // Execution against a test host
    ExecutionInitialize,
    StartTestExecutionWithSources,
    StartTestExecutionWithTests,
    TestRunStatsChange,
    ExecutionComplete,
    CancelTestRun,
    AbortTestRun,
    LaunchAdapterProcessWithDebuggerAttached,
    LaunchAdapterProcessWithDebuggerAttachedCallback,

    // Execution requested by a design-mode client
    GetTestRunnerProcessStartInfoForRunAll,
    GetTestRunnerProcessStartInfoForRunSelected,
    TestRunAllSourcesWithDefaultHost,
    TestRunSelectedTestCasesDefaultHost,
    CustomTestHostLaunch,
    CustomTestHostLaunchCallback,
}

/// Metadata entry for a message type.
pub type MessageTypeInfo = MessageInfo<MessageTypeId>;

/// Registry of supported message types.
pub const MESSAGE_TYPES: &[MessageTypeInfo] = &[
    info(
        MessageTypeId::VersionCheck,
        "ProtocolVersion",
        Direction::Both,
        "Negotiate the protocol version; payload is the sender's highest version.",
        1,
    ),
    info(
        MessageTypeId::SessionConnected,
        "TestSession.Connected",
        Direction::ToClient,
        "Announce that the controller connected to a design-mode client.",
        1,
    ),
    info(
        MessageTypeId::SessionEnd,
        "TestSession.Terminate",
        Direction::Both,
        "End the session; the receiver tears down and exits.",
        1,
    ),
    info(
        MessageTypeId::TestMessage,
        "TestSession.Message",
        Direction::Both,
        "Informational, warning or error text produced during a request.",
        1,
    ),
    info(
        MessageTypeId::ExtensionsInitialize,
        "Extensions.Initialize",
        Direction::FromClient,
        "Paths of adapter extensions to load for subsequent requests.",
        1,
    ),
    info(
        MessageTypeId::DiscoveryInitialize,
        "TestDiscovery.Initialize",
        Direction::ToHost,
        "Load adapters for discovery.",
        1,
    ),
    info(
        MessageTypeId::StartDiscovery,
        "TestDiscovery.Start",
        Direction::Both,
        "Start discovering tests in the given sources.",
        1,
    ),
    info(
        MessageTypeId::TestCasesFound,
        "TestDiscovery.TestFound",
        Direction::Both,
        "A chunk of discovered test cases.",
        1,
    ),
    info(
        MessageTypeId::DiscoveryComplete,
        "TestDiscovery.Completed",
        Direction::Both,
        "Discovery finished; carries the last chunk and totals.",
        1,
    ),
    info(
        MessageTypeId::CancelDiscovery,
        "TestDiscovery.Cancel",
        Direction::Both,
        "Cancel an in-flight discovery.",
        1,
    ),
    info(
        MessageTypeId::ExecutionInitialize,
        "TestExecution.Initialize",
        Direction::ToHost,
        "Load adapters for execution.",
        1,
    ),
    info(
        MessageTypeId::StartTestExecutionWithSources,
        "TestExecution.StartWithSources",
        Direction::ToHost,
        "Run all tests in the given sources.",
        1,
    ),
    info(
        MessageTypeId::StartTestExecutionWithTests,
        "TestExecution.StartWithTests",
        Direction::ToHost,
        "Run the given test cases.",
        1,
    ),
    info(
        MessageTypeId::TestRunStatsChange,
        "TestExecution.StatsChange",
        Direction::Both,
        "A chunk of test results and updated run statistics.",
        1,
    ),
    info(
        MessageTypeId::ExecutionComplete,
        "TestExecution.Completed",
        Direction::Both,
        "The run finished; carries the last chunk, attachments and cancel/abort flags.",
        1,
    ),
    info(
        MessageTypeId::CancelTestRun,
        "TestExecution.Cancel",
        Direction::Both,
        "Ask the run to wind down cooperatively.",
        1,
    ),
    info(
        MessageTypeId::AbortTestRun,
        "TestExecution.Abort",
        Direction::Both,
        "Abort the run.",
        1,
    ),
    info(
        MessageTypeId::LaunchAdapterProcessWithDebuggerAttached,
        "TestExecution.LaunchAdapterProcessWithDebuggerAttached",
        Direction::FromHost,
        "A test host asks the controller to launch a child process with a debugger attached.",
        1,
    ),
    info(
        MessageTypeId::LaunchAdapterProcessWithDebuggerAttachedCallback,
        "TestExecution.LaunchAdapterProcessWithDebuggerAttachedCallback",
        Direction::ToHost,
        "Process id of the child launched on behalf of the test host.",
        1,
    ),
    info(
        MessageTypeId::GetTestRunnerProcessStartInfoForRunAll,
        "TestExecution.GetTestRunnerProcessStartInfoForRunAll",
        Direction::FromClient,
        "Run all tests in sources; the client launches the test host.",
        1,
    ),
    info(
        MessageTypeId::GetTestRunnerProcessStartInfoForRunSelected,
        "TestExecution.GetTestRunnerProcessStartInfoForRunSelected",
        Direction::FromClient,
        "Run selected test cases; the client launches the test host.",
        1,
    ),
    info(
        MessageTypeId::TestRunAllSourcesWithDefaultHost,
        "TestExecution.RunAllWithDefaultHost",
        Direction::FromClient,
        "Run all tests in sources with a controller-launched test host.",
        1,
    ),
    info(
        MessageTypeId::TestRunSelectedTestCasesDefaultHost,
        "TestExecution.RunSelectedWithDefaultHost",
        Direction::FromClient,
        "Run selected test cases with a controller-launched test host.",
        1,
    ),
    info(
        MessageTypeId::CustomTestHostLaunch,
        "TestExecution.CustomTestHostLaunch",
        Direction::ToClient,
        "Ask the client to launch a process from the given start info.",
        1,
    ),
    info(
        MessageTypeId::CustomTestHostLaunchCallback,
        "TestExecution.CustomTestHostLaunchCallback",
        Direction::FromClient,
        "Acknowledge a custom launch with the spawned process id or an error.",
        1,
    ),
];

/// Resolve a wire spelling to its stable id.
pub fn from_str(name: &str) -> Option<MessageTypeId> {
    MESSAGE_TYPES.iter().find(|m| m.canonical == name).map(|m| m.id)
}

/// Return the canonical wire spelling for a message type.
pub fn as_str(id: MessageTypeId) -> &'static str {
    info_for(id).canonical
}

/// Return the metadata entry for a message type.
pub fn info_for(id: MessageTypeId) -> &'static MessageTypeInfo {
    MESSAGE_TYPES
        .iter()
        .find(|m| m.id == id)
        .expect("message type info missing")
}

impl MessageTypeId {
    /// Return the canonical wire spelling.
    pub fn as_str(self) -> &'static str {
        as_str(self)
    }
}

impl std::fmt::Display for MessageTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const fn info(
    id: MessageTypeId,
    canonical: &'static str,
    direction: Direction,
    description: &'static str,
    since_version: u32,
) -> MessageTypeInfo {
    MessageInfo {
        id,
        canonical,
        direction,
        description,
        since_version,
    }
}
