//! Controller configuration.
//!
//! Defaults are compiled in; environment variables overlay them (see [`PlatformConfig::from_env`]), and the CLI
//! overlays flags on top of that.

use std::path::PathBuf;
use std::time::Duration;

use testplatform_core::protocol::HIGHEST_SUPPORTED_VERSION;
use testplatform_core::{PlatformError, PlatformResult};

use crate::hosting::{Architecture, HostSettings};

/// Seconds to wait for a launched host to connect back.
pub const CONNECTION_TIMEOUT_ENV: &str = "TESTPLATFORM_CONNECTION_TIMEOUT";
/// Seconds to wait for a client to acknowledge a custom host launch.
pub const HOST_LAUNCH_TIMEOUT_ENV: &str = "TESTPLATFORM_HOST_LAUNCH_TIMEOUT";
/// Seconds a cancel or abort waits for the request it targets to be created.
pub const REQUEST_CREATION_TIMEOUT_ENV: &str = "TESTPLATFORM_REQUEST_CREATION_TIMEOUT";
/// Path of the diagnostics log handed to test hosts.
pub const DIAG_ENV: &str = "TESTPLATFORM_DIAG";
/// Overrides the directory test hosts are started from.
pub const HOST_DIRECTORY_ENV: &str = "TESTPLATFORM_HOST_DIRECTORY";
/// Overrides the worker architecture (`x64`, `x86`, `arm64`).
pub const HOST_ARCHITECTURE_ENV: &str = "TESTPLATFORM_HOST_ARCHITECTURE";

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// How long a launched host has to connect back
    pub connection_timeout: Duration,
    /// How long cancel/abort wait for the request they target to appear
    pub request_creation_timeout: Duration,
    /// How long a custom launch waits for the client's acknowledgement
    pub host_launch_timeout: Duration,
    /// Upper bound on a whole run or discovery; `None` waits indefinitely
    pub completion_timeout: Option<Duration>,
    /// How long a host gets to exit on its own after the session ends
    pub host_exit_grace: Duration,
    /// Protocol version the controller offers during negotiation
    pub protocol_version: u32,
    /// Results per progress chunk requested from hosts
    pub batch_size: usize,
    /// Collect and aggregate telemetry from hosts
    pub collect_metrics: bool,
    /// Diagnostics log forwarded to hosts
    pub diag_file: Option<PathBuf>,
    /// Root for per-session artifact directories; `None` disables artifact snapshots
    pub artifacts_root: Option<PathBuf>,
    /// Extension assemblies hosts should load
    pub extensions: Vec<String>,
    pub host: HostSettings,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(90),
            request_creation_timeout: Duration::from_secs(5),
            host_launch_timeout: Duration::from_secs(90),
            completion_timeout: None,
            host_exit_grace: Duration::from_millis(500),
            protocol_version: HIGHEST_SUPPORTED_VERSION,
            batch_size: 10,
            collect_metrics: false,
            diag_file: None,
            artifacts_root: None,
            extensions: Vec::new(),
            host: HostSettings::default(),
        }
    }
}

impl PlatformConfig {
    /// Create a new config with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> PlatformResult<Self> {
        Self::default().overlay_env(|name| std::env::var(name).ok())
    }

    /// Overlay settings found through `lookup`. Unset variables leave the current value alone.
    pub fn overlay_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> PlatformResult<Self> {
        if let Some(secs) = lookup(CONNECTION_TIMEOUT_ENV) {
            self.connection_timeout = parse_seconds(CONNECTION_TIMEOUT_ENV, &secs)?;
        }
        if let Some(secs) = lookup(HOST_LAUNCH_TIMEOUT_ENV) {
            self.host_launch_timeout = parse_seconds(HOST_LAUNCH_TIMEOUT_ENV, &secs)?;
        }
        if let Some(secs) = lookup(REQUEST_CREATION_TIMEOUT_ENV) {
            self.request_creation_timeout = parse_seconds(REQUEST_CREATION_TIMEOUT_ENV, &secs)?;
        }
        if let Some(path) = lookup(DIAG_ENV).filter(|p| !p.trim().is_empty()) {
            self.diag_file = Some(PathBuf::from(path));
        }
        if let Some(dir) = lookup(HOST_DIRECTORY_ENV).filter(|p| !p.trim().is_empty()) {
            self.host.host_directory = Some(PathBuf::from(dir));
        }
        if let Some(arch) = lookup(HOST_ARCHITECTURE_ENV) {
            self.host.architecture = Architecture::from_str(arch.trim())
                .ok_or_else(|| PlatformError::settings(format!("{HOST_ARCHITECTURE_ENV}: unknown architecture '{arch}'")))?;
        }
        Ok(self)
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_request_creation_timeout(mut self, timeout: Duration) -> Self {
        self.request_creation_timeout = timeout;
        self
    }

    pub fn with_host_launch_timeout(mut self, timeout: Duration) -> Self {
        self.host_launch_timeout = timeout;
        self
    }

    pub fn with_completion_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.completion_timeout = timeout;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_diag_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.diag_file = Some(path.into());
        self
    }

    pub fn with_artifacts_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.artifacts_root = Some(root.into());
        self
    }

    pub fn with_host_settings(mut self, host: HostSettings) -> Self {
        self.host = host;
        self
    }
}

fn parse_seconds(name: &str, value: &str) -> PlatformResult<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| PlatformError::settings(format!("{name}: expected whole seconds, got '{value}'")))
}
