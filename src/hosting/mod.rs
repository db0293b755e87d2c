//! Test host supervision: computing how a worker process is started, launching it, and watching it exit.
//!
//! ## Notes
//!
//! - [`TestHostLauncher`] is the seam for custom launchers. An IDE launches the host itself (usually under a
//!   debugger) and reports back the process id.
//! - [`TestHostManager`] is the seam the proxies talk to; [`DefaultTestHostManager`] is the process-backed
//!   implementation.

mod default_host;

pub use default_host::DefaultTestHostManager;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use testplatform_core::PlatformResult;
use testplatform_core::objectmodel::TestProcessStartInfo;

// ============================================================================
// Launcher / manager seams
// ============================================================================

/// Launches a test host on behalf of the controller and reports its process id.
pub trait TestHostLauncher: Send + Sync {
    /// Whether hosts launched through this launcher run under a debugger.
    fn is_debug(&self) -> bool;

    /// Start the process described by `start_info`. Blocks until the process id is known.
    fn launch_test_host(&self, start_info: &TestProcessStartInfo) -> PlatformResult<u32>;
}

/// Invoked once when a supervised host exits; receives the exit code if the platform reports one.
pub type ExitCallback = Arc<dyn Fn(Option<i32>) + Send + Sync>;

/// Computes, launches and supervises a single test host.
pub trait TestHostManager: Send + Sync {
    /// Describe the worker process: which binary, which arguments, which environment.
    fn compute_start_info(
        &self,
        environment: &BTreeMap<String, String>,
        arguments: &HostArguments,
    ) -> PlatformResult<TestProcessStartInfo>;

    /// Start the host, through `launcher` when one is supplied. Returns the process id.
    fn launch(&self, start_info: &TestProcessStartInfo, launcher: Option<&dyn TestHostLauncher>) -> PlatformResult<u32>;

    /// Install the exit callback, replacing any previously registered one.
    fn register_exit_notification(&self, callback: ExitCallback);

    /// Drop the exit callback and stop the host, giving it `grace` to exit on its own first.
    fn clean_up(&self, grace: Duration) -> PlatformResult<()>;
}

// ============================================================================
// Host settings
// ============================================================================

/// Processor architecture of the worker binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    X64,
    X86,
    Arm64,
}

impl Architecture {
    /// Architecture of the running controller.
    pub fn current() -> Self {
        match std::env::consts::ARCH {
            "x86" => Architecture::X86,
            "aarch64" => Architecture::Arm64,
            _ => Architecture::X64,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "x64" | "x86_64" | "amd64" => Some(Architecture::X64),
            "x86" | "i686" => Some(Architecture::X86),
            "arm64" | "aarch64" => Some(Architecture::Arm64),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Architecture::X64 => "x64",
            Architecture::X86 => "x86",
            Architecture::Arm64 => "arm64",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the worker lives and how it is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSettings {
    /// File stem of the shared runtime host. When the controller itself runs under this host, the worker is
    /// started as `<runtime> exec <worker_assembly>` instead of as a native binary.
    pub runtime_host_name: String,
    /// Worker entry assembly loaded by the runtime host.
    pub worker_assembly: String,
    /// Base name of the native worker binary; an architecture suffix is appended for non-x64 targets.
    pub worker_executable: String,
    /// Directory containing the worker. Defaults to the controller's own directory.
    pub host_directory: Option<PathBuf>,
    pub architecture: Architecture,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            runtime_host_name: "dotnet".to_string(),
            worker_assembly: "testhost.dll".to_string(),
            worker_executable: "testhost".to_string(),
            host_directory: None,
            architecture: Architecture::current(),
        }
    }
}

impl HostSettings {
    /// File name of the native worker for the configured architecture.
    pub fn worker_binary_name(&self) -> String {
        let base = match self.architecture {
            Architecture::X64 => self.worker_executable.clone(),
            arch => format!("{}.{}", self.worker_executable, arch),
        };
        format!("{base}{}", std::env::consts::EXE_SUFFIX)
    }
}

// ============================================================================
// Host command line
// ============================================================================

/// The arguments every worker receives: where to connect back and who its parent is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostArguments {
    pub port: u16,
    pub parent_process_id: u32,
    pub diag_file: Option<PathBuf>,
}

impl HostArguments {
    pub fn new(port: u16, parent_process_id: u32) -> Self {
        Self {
            port,
            parent_process_id,
            diag_file: None,
        }
    }

    pub fn with_diag_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.diag_file = Some(path.into());
        self
    }

    /// Render as a command-line fragment.
    pub fn to_command_line(&self) -> String {
        let mut line = format!(
            "--port {port} --endpoint 127.0.0.1:{port} --role client --parentprocessid {pid}",
            port = self.port,
            pid = self.parent_process_id
        );
        if let Some(diag) = &self.diag_file {
            line.push_str(&format!(" --diag \"{}\"", diag.display()));
        }
        line
    }
}
