//! CLI command implementations
//!
//! All command functions return `CliResult<ExitCode>` instead of calling
//! `process::exit`. Error handling and exits happen in the top-level `run()`.

use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use testplatform_core::objectmodel::{DiscoveryRequestPayload, TestPlatformOptions, TestRunRequestPayload};

use super::reporter::{ConsoleDiscoveryReporter, ConsoleRunReporter};
use super::{CliError, CliResult, ExitCode};
use crate::client::{RequestState, TestEngine, TestRequestManager};
use crate::config::PlatformConfig;
use crate::design_mode::DesignModeClient;
use crate::proxy::ProcessTestEngine;

// ============================================================================
// Shared setup
// ============================================================================

/// Options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub diag: Option<PathBuf>,
    pub host_dir: Option<PathBuf>,
    pub artifacts: Option<PathBuf>,
    pub connection_timeout: Option<u64>,
}

/// Defaults, then the environment, then command-line flags.
pub fn build_config(options: &GlobalOptions) -> CliResult<PlatformConfig> {
    let mut config = PlatformConfig::from_env().map_err(|e| CliError::failure(format!("Error: {e}")))?;
    if let Some(diag) = &options.diag {
        config = config.with_diag_file(diag.clone());
    }
    if let Some(dir) = &options.host_dir {
        config.host.host_directory = Some(dir.clone());
    }
    if let Some(root) = &options.artifacts {
        config = config.with_artifacts_root(root.clone());
    }
    if let Some(secs) = options.connection_timeout {
        config = config.with_connection_timeout(Duration::from_secs(secs));
    }
    Ok(config)
}

fn read_settings(path: Option<&Path>) -> CliResult<Option<String>> {
    let Some(path) = path else {
        return Ok(None);
    };
    fs::read_to_string(path)
        .map(Some)
        .map_err(|e| CliError::failure(format!("Error reading run settings {}: {e}", path.display())))
}

fn source_strings(sources: &[PathBuf]) -> Vec<String> {
    sources.iter().map(|p| p.to_string_lossy().to_string()).collect()
}

fn manager(config: PlatformConfig) -> TestRequestManager {
    let engine: Arc<dyn TestEngine> = Arc::new(ProcessTestEngine::new(config.clone()));
    TestRequestManager::new(engine, config)
}

// ============================================================================
// Commands
// ============================================================================

/// `testplatform discover`
pub fn discover(
    config: PlatformConfig,
    sources: &[PathBuf],
    settings: Option<&Path>,
    filter: Option<String>,
) -> CliResult<ExitCode> {
    let payload = DiscoveryRequestPayload {
        sources: source_strings(sources),
        run_settings: read_settings(settings)?,
        test_platform_options: Some(TestPlatformOptions {
            test_case_filter: filter,
            collect_metrics: false,
        }),
    };

    let manager = manager(config);
    let reporter = ConsoleDiscoveryReporter::default();
    let ok = manager.discover_tests(payload, &reporter);

    let outcome = manager.last_discovery_outcome();
    if !ok || reporter.has_errors() || outcome.as_ref().is_some_and(|o| o.state == RequestState::Aborted) {
        return Ok(ExitCode::FAILURE);
    }
    println!();
    println!("{} test(s) discovered", reporter.discovered().len());
    Ok(ExitCode::SUCCESS)
}

/// What `testplatform run` was asked to do.
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub sources: Vec<PathBuf>,
    pub settings: Option<PathBuf>,
    pub filter: Option<String>,
    pub collect_metrics: bool,
    pub verbose: bool,
}

/// `testplatform run`
pub fn run(config: PlatformConfig, args: RunArgs) -> CliResult<ExitCode> {
    let payload = TestRunRequestPayload {
        sources: Some(source_strings(&args.sources)),
        run_settings: read_settings(args.settings.as_deref())?,
        test_platform_options: Some(TestPlatformOptions {
            test_case_filter: args.filter,
            collect_metrics: args.collect_metrics,
        }),
        ..TestRunRequestPayload::default()
    };

    let manager = manager(config);
    let reporter = ConsoleRunReporter::new(args.verbose);
    let ok = manager.run_tests(payload, None, &reporter);
    let summary = reporter.summary();

    println!();
    let verdict = if summary.aborted {
        "Aborted"
    } else if summary.canceled {
        "Canceled"
    } else if summary.is_success() && ok {
        "Passed"
    } else {
        "Failed"
    };
    println!(
        "{verdict}: {} passed, {} failed, {} skipped, {} total",
        summary.passed,
        summary.failed,
        summary.skipped,
        summary.total()
    );
    if let Some(outcome) = manager.last_run_outcome() {
        if let Some(elapsed) = outcome.elapsed {
            println!("Time: {:.2}s", elapsed.as_secs_f64());
        }
        if !outcome.metrics.is_empty() {
            match serde_json::to_string_pretty(&outcome.metrics) {
                Ok(json) => println!("Metrics: {json}"),
                Err(e) => tracing::warn!(error = %e, "cannot print metrics"),
            }
        }
    }

    if ok && summary.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// `testplatform design-mode`: serve an IDE until it ends the session.
pub fn design_mode(config: PlatformConfig, port: u16, parent_process_id: Option<u32>) -> CliResult<ExitCode> {
    tracing::info!(port, ?parent_process_id, "starting design mode");
    let manager = Arc::new(manager(config));
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let client = DesignModeClient::connect(addr, manager)
        .map_err(|e| CliError::failure(format!("Error: cannot connect to the client on port {port}: {e}")))?;
    client
        .run()
        .map_err(|e| CliError::failure(format!("Error: design-mode session failed: {e}")))?;
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let options = GlobalOptions {
            diag: Some(PathBuf::from("/tmp/diag.log")),
            host_dir: Some(PathBuf::from("/opt/hosts")),
            artifacts: None,
            connection_timeout: Some(3),
        };
        let config = build_config(&options).unwrap();
        assert_eq!(config.diag_file, Some(PathBuf::from("/tmp/diag.log")));
        assert_eq!(config.host.host_directory, Some(PathBuf::from("/opt/hosts")));
        assert_eq!(config.connection_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_read_settings() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.runsettings");
        fs::write(&path, "<RunSettings/>").unwrap();
        assert_eq!(read_settings(Some(path.as_path())).unwrap().as_deref(), Some("<RunSettings/>"));
        assert_eq!(read_settings(None).unwrap(), None);
        assert!(read_settings(Some(tmp.path().join("missing").as_path())).is_err());
    }
}
