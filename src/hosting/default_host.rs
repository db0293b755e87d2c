//! Process-backed [`TestHostManager`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use testplatform_core::objectmodel::TestProcessStartInfo;
use testplatform_core::{PlatformError, PlatformResult};

use super::{ExitCallback, HostArguments, HostSettings, TestHostLauncher, TestHostManager};
use crate::sync::lock;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Shared between the manager and the exit watcher thread.
#[derive(Default)]
struct Supervised {
    child: Mutex<Option<Child>>,
    callback: Mutex<Option<ExitCallback>>,
    stopped: AtomicBool,
}

impl Supervised {
    fn notify_exit(&self, code: Option<i32>) {
        // Cloned out so the callback may call back into the manager.
        let callback = lock(&self.callback).clone();
        if let Some(callback) = callback {
            callback(code);
        }
    }
}

/// Launches the worker as a child process (or through a custom launcher) and watches it for exit.
pub struct DefaultTestHostManager {
    settings: HostSettings,
    controller_path: PathBuf,
    supervised: Arc<Supervised>,
    pid: Mutex<Option<u32>>,
}

impl DefaultTestHostManager {
    /// Create a manager for the running controller executable.
    pub fn new(settings: HostSettings) -> PlatformResult<Self> {
        let controller_path = std::env::current_exe()
            .map_err(|e| PlatformError::platform(format!("cannot resolve controller executable: {e}")))?;
        Ok(Self::with_controller_path(settings, controller_path))
    }

    /// Create a manager as if the controller were running from `controller_path`.
    pub fn with_controller_path(settings: HostSettings, controller_path: impl Into<PathBuf>) -> Self {
        Self {
            settings,
            controller_path: controller_path.into(),
            supervised: Arc::new(Supervised::default()),
            pid: Mutex::new(None),
        }
    }

    /// Process id of the launched host, if any.
    pub fn process_id(&self) -> Option<u32> {
        *lock(&self.pid)
    }

    fn host_directory(&self) -> PathBuf {
        self.settings
            .host_directory
            .clone()
            .or_else(|| self.controller_path.parent().map(Path::to_path_buf))
            .unwrap_or_default()
    }

    fn runs_under_runtime_host(&self) -> bool {
        self.controller_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .is_some_and(|stem| stem.eq_ignore_ascii_case(&self.settings.runtime_host_name))
    }

    fn spawn(&self, start_info: &TestProcessStartInfo) -> PlatformResult<u32> {
        let mut command = Command::new(&start_info.file_name);
        command
            .args(start_info.argument_list())
            .envs(&start_info.environment_variables)
            .stdin(Stdio::null());
        if let Some(dir) = &start_info.working_directory {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|e| {
            PlatformError::platform(format!("failed to launch test host '{}': {e}", start_info.file_name))
        })?;
        let pid = child.id();
        *lock(&self.supervised.child) = Some(child);
        self.supervised.stopped.store(false, Ordering::SeqCst);

        let supervised = Arc::clone(&self.supervised);
        thread::Builder::new()
            .name(format!("testplatform-host-{pid}"))
            .spawn(move || watch_exit(&supervised))
            .map_err(|e| PlatformError::platform(format!("failed to start exit watcher: {e}")))?;

        tracing::info!(pid, file = %start_info.file_name, "test host launched");
        Ok(pid)
    }
}

fn watch_exit(supervised: &Supervised) {
    loop {
        if supervised.stopped.load(Ordering::SeqCst) {
            return;
        }
        let status = {
            let mut child = lock(&supervised.child);
            match child.as_mut().map(Child::try_wait) {
                None => return,
                Some(Ok(Some(status))) => {
                    *child = None;
                    Some(status)
                }
                Some(Ok(None)) => None,
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "cannot poll test host status");
                    return;
                }
            }
        };
        if let Some(status) = status {
            tracing::debug!(code = ?status.code(), "test host exited");
            supervised.notify_exit(status.code());
            return;
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}

impl TestHostManager for DefaultTestHostManager {
    fn compute_start_info(
        &self,
        environment: &BTreeMap<String, String>,
        arguments: &HostArguments,
    ) -> PlatformResult<TestProcessStartInfo> {
        let dir = self.host_directory();
        let host_args = arguments.to_command_line();

        let (file_name, arguments) = if self.runs_under_runtime_host() {
            let assembly = dir.join(&self.settings.worker_assembly);
            (
                self.controller_path.display().to_string(),
                format!("exec \"{}\" {host_args}", assembly.display()),
            )
        } else {
            let binary = dir.join(self.settings.worker_binary_name());
            (binary.display().to_string(), host_args)
        };

        Ok(TestProcessStartInfo {
            file_name,
            arguments,
            working_directory: Some(dir.display().to_string()),
            environment_variables: environment.clone(),
        })
    }

    fn launch(&self, start_info: &TestProcessStartInfo, launcher: Option<&dyn TestHostLauncher>) -> PlatformResult<u32> {
        let pid = match launcher {
            Some(launcher) => {
                let pid = launcher.launch_test_host(start_info)?;
                tracing::info!(pid, debug = launcher.is_debug(), "test host launched by custom launcher");
                pid
            }
            None => self.spawn(start_info)?,
        };
        *lock(&self.pid) = Some(pid);
        Ok(pid)
    }

    fn register_exit_notification(&self, callback: ExitCallback) {
        *lock(&self.supervised.callback) = Some(callback);
    }

    fn clean_up(&self, grace: Duration) -> PlatformResult<()> {
        lock(&self.supervised.callback).take();
        self.supervised.stopped.store(true, Ordering::SeqCst);

        let Some(mut child) = lock(&self.supervised.child).take() else {
            return Ok(());
        };

        let deadline = Instant::now() + grace;
        loop {
            if child.try_wait()?.is_some() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }

        tracing::debug!(pid = child.id(), "test host did not exit in time; killing");
        child.kill()?;
        child.wait()?;
        Ok(())
    }
}

impl Drop for DefaultTestHostManager {
    fn drop(&mut self) {
        if let Err(err) = self.clean_up(Duration::ZERO) {
            tracing::debug!(error = %err, "test host clean up on drop failed");
        }
    }
}
