//! Per-invocation artifact snapshots.
//!
//! Layout: `<root>/<session-id>/<invocation-id>/{runsettings.xml, executionComplete.json}`. A post-processing
//! step (attachment merging, report generation) walks the session directory after the session ends.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use uuid::Uuid;

use testplatform_core::PlatformResult;
use testplatform_core::objectmodel::{AttachmentSet, TestRunCompleteEventArgs};

pub const RUN_SETTINGS_FILE: &str = "runsettings.xml";
pub const EXECUTION_COMPLETE_FILE: &str = "executionComplete.json";

/// Written when the run carried no settings of its own.
pub const EMPTY_RUN_SETTINGS: &str = "<RunSettings />";

/// What `executionComplete.json` holds.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ExecutionCompleteSnapshot<'a> {
    invocation_id: Uuid,
    test_run_complete_args: &'a TestRunCompleteEventArgs,
    run_attachments: &'a [AttachmentSet],
}

/// Writes artifacts for one controller session.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    session_dir: PathBuf,
    session_id: Uuid,
}

impl ArtifactStore {
    pub fn new(root: impl AsRef<Path>, session_id: Uuid) -> Self {
        Self {
            session_dir: root.as_ref().join(session_id.to_string()),
            session_id,
        }
    }

    /// Store under the system temp directory, keyed by a fresh session id.
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir().join("testplatform"), Uuid::new_v4())
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// Write the artifact pair for one worker invocation. Returns the invocation directory.
    pub fn record_run(
        &self,
        run_settings: Option<&str>,
        complete: &TestRunCompleteEventArgs,
        run_attachments: &[AttachmentSet],
    ) -> PlatformResult<PathBuf> {
        let invocation_id = Uuid::new_v4();
        let dir = self.session_dir.join(invocation_id.to_string());
        fs::create_dir_all(&dir)?;

        fs::write(dir.join(RUN_SETTINGS_FILE), run_settings.unwrap_or(EMPTY_RUN_SETTINGS))?;
        let snapshot = ExecutionCompleteSnapshot {
            invocation_id,
            test_run_complete_args: complete,
            run_attachments,
        };
        fs::write(dir.join(EXECUTION_COMPLETE_FILE), serde_json::to_vec_pretty(&snapshot)?)?;

        tracing::debug!(dir = %dir.display(), "run artifacts written");
        Ok(dir)
    }

    /// Invocation directories recorded so far, sorted by path.
    pub fn invocations(&self) -> PlatformResult<Vec<PathBuf>> {
        if !self.session_dir.exists() {
            return Ok(Vec::new());
        }
        let mut dirs = Vec::new();
        for entry in fs::read_dir(&self.session_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Remove the session directory.
    pub fn clean_up(&self) -> PlatformResult<()> {
        if self.session_dir.exists() {
            fs::remove_dir_all(&self.session_dir)?;
        }
        Ok(())
    }
}
