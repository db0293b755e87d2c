//! CLI module for the test platform controller
//!
//! ## Commands
//!
//! - `discover <SOURCES>...` - List the tests in one or more sources
//! - `run <SOURCES>...` - Run the tests in one or more sources
//! - `design-mode --port <PORT>` - Serve an IDE over a socket
//!
//! ## Modules
//!
//! - `commands` - Command implementations
//! - `reporter` - Console listeners for discovery and runs
//!
//! ## Design
//!
//! The CLI uses clap for argument parsing with derive macros.
//! Command functions return `CliResult<T>` instead of calling `process::exit`.
//! Only the top-level `run()` function handles errors and exits.

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod commands;
pub mod reporter;

use std::fs::File;
use std::path::PathBuf;
use std::process;
use std::sync::Mutex;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::version::TESTPLATFORM_VERSION;

// ============================================================================
// CLI Error handling
// ============================================================================

/// Exit code for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);
}

/// Error type for CLI operations.
///
/// Contains a user-facing message and an exit code. The CLI entry point
/// catches these errors, prints the message, and exits with the code.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CliError {
    /// User-facing error message (already formatted for display)
    pub message: String,
    /// Exit code to return to the shell
    pub exit_code: ExitCode,
}

impl CliError {
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    /// Create a failure error (exit code 1).
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::FAILURE)
    }
}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

// ============================================================================
// Clap CLI definition
// ============================================================================

/// Test platform controller
#[derive(Parser, Debug)]
#[command(name = "testplatform")]
#[command(version = TESTPLATFORM_VERSION)]
#[command(about = "Discover and run tests in out-of-process test hosts", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Write diagnostics logs to FILE instead of stderr (test hosts log next to it)
    #[arg(long, global = true, value_name = "FILE")]
    pub diag: Option<PathBuf>,

    /// Directory holding the test host binaries
    #[arg(long = "host-dir", global = true, value_name = "DIR")]
    pub host_dir: Option<PathBuf>,

    /// Keep per-run artifacts under DIR
    #[arg(long, global = true, value_name = "DIR")]
    pub artifacts: Option<PathBuf>,

    /// Seconds a test host has to connect back
    #[arg(long = "connection-timeout", global = true, value_name = "SECS")]
    pub connection_timeout: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the tests in one or more sources
    Discover {
        /// Test sources (assemblies, binaries)
        #[arg(value_name = "SOURCES", required = true)]
        sources: Vec<PathBuf>,
        /// Run settings file handed to test hosts unchanged
        #[arg(long, value_name = "FILE")]
        settings: Option<PathBuf>,
        /// Test case filter expression
        #[arg(long, value_name = "EXPR")]
        filter: Option<String>,
    },

    /// Run the tests in one or more sources
    Run {
        /// Test sources (assemblies, binaries)
        #[arg(value_name = "SOURCES", required = true)]
        sources: Vec<PathBuf>,
        /// Run settings file handed to test hosts unchanged
        #[arg(long, value_name = "FILE")]
        settings: Option<PathBuf>,
        /// Test case filter expression
        #[arg(long, value_name = "EXPR")]
        filter: Option<String>,
        /// Print the metrics collected from test hosts
        #[arg(long = "collect-metrics")]
        collect_metrics: bool,
        /// Print passing tests too
        #[arg(short, long)]
        verbose: bool,
    },

    /// Serve an IDE listening on PORT
    DesignMode {
        #[arg(long, value_name = "PORT")]
        port: u16,
        /// Process id of the IDE
        #[arg(long = "parent-process-id", value_name = "PID")]
        parent_process_id: Option<u32>,
    },
}

// ============================================================================
// CLI entry point
// ============================================================================

/// Main CLI entry point.
///
/// This is the only place where `process::exit` is called. All command
/// implementations return `CliResult` and errors are handled here.
pub fn run() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.diag.as_ref()) {
        eprintln!("{}", e.message);
        process::exit(e.exit_code.0);
    }

    match execute(cli) {
        Ok(exit_code) => {
            if exit_code.0 != 0 {
                process::exit(exit_code.0);
            }
        }
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            process::exit(e.exit_code.0);
        }
    }
}

/// Structured logging with an env-based filter defaulting to info; `--diag` redirects it to a file.
fn init_tracing(diag: Option<&PathBuf>) -> CliResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = match diag {
        Some(path) => {
            let file = File::create(path)
                .map_err(|e| CliError::failure(format!("Error: cannot open diagnostics log {}: {e}", path.display())))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    Ok(())
}

/// Execute the CLI command and return result.
fn execute(cli: Cli) -> CliResult<ExitCode> {
    let options = commands::GlobalOptions {
        diag: cli.diag,
        host_dir: cli.host_dir,
        artifacts: cli.artifacts,
        connection_timeout: cli.connection_timeout,
    };
    let config = commands::build_config(&options)?;

    match cli.command {
        Command::Discover {
            sources,
            settings,
            filter,
        } => commands::discover(config, &sources, settings.as_deref(), filter),
        Command::Run {
            sources,
            settings,
            filter,
            collect_metrics,
            verbose,
        } => commands::run(
            config,
            commands::RunArgs {
                sources,
                settings,
                filter,
                collect_metrics,
                verbose,
            },
        ),
        Command::DesignMode {
            port,
            parent_process_id,
        } => commands::design_mode(config, port, parent_process_id),
    }
}

// ============================================================================
// Tests
// ============================================================================
