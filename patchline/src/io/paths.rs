//! Canonical paths under a patchline workspace root.

use std::path::{Path, PathBuf};

/// All well-known paths the orchestrator reads or writes for a given root.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub patchline_dir: PathBuf,
    pub config_path: PathBuf,
    pub state_path: PathBuf,
    pub jobs_path: PathBuf,
    pub blocklist_path: PathBuf,
    pub runs_dir: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let patchline_dir = root.join(".patchline");
        Self {
            root: root.clone(),
            patchline_dir: patchline_dir.clone(),
            config_path: patchline_dir.join("config.toml"),
            state_path: patchline_dir.join("state.json"),
            jobs_path: patchline_dir.join("jobs.json"),
            blocklist_path: patchline_dir.join("blocklist.txt"),
            runs_dir: patchline_dir.join("runs"),
        }
    }

    /// Log directory for one run.
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id)
    }

    /// Data directory holding the versioned input files.
    pub fn data_dir(&self, configured: &str) -> PathBuf {
        self.root.join(configured)
    }

    /// Directory scanned for candidate patcher packages.
    pub fn packages_dir(&self, configured: &str) -> PathBuf {
        self.root.join(configured)
    }

    /// Directory the jobs write their output artifacts into.
    pub fn output_dir(&self, configured: &str) -> PathBuf {
        self.root.join(configured)
    }
}

/// Resolve a possibly-relative command path against a package directory.
pub fn resolve_command(package_dir: &Path, program: &str) -> PathBuf {
    let program_path = Path::new(program);
    if program_path.is_absolute() || program_path.components().count() == 1 {
        // Absolute paths and bare program names (resolved via PATH) pass
        // through untouched.
        program_path.to_path_buf()
    } else {
        package_dir.join(program_path)
    }
}
