//! Patcher package manifests: the "describe yourself" handshake.
//!
//! Every candidate package must carry a `patcher.toml` describing itself over
//! a stable contract. Discovery instantiates nothing and reflects on nothing:
//! a package that cannot produce a valid manifest is simply not a job.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// Manifest file name inside each candidate package directory.
pub const MANIFEST_FILE: &str = "patcher.toml";

/// Contract major version this host speaks.
pub const CONTRACT_VERSION: u32 = 1;

/// Capabilities the host currently invokes. A package missing any of these
/// is stale: it gets reported as blocked, never executed.
pub const REQUIRED_CAPABILITIES: &[&str] = &["describe", "run"];

/// A parsed package manifest.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    /// Declared job name; identity, compared case-insensitively.
    pub name: String,
    /// Identifier of the output artifact this job produces.
    pub artifact: String,
    /// Declared tool version of the patcher itself.
    pub version: String,
    /// Contract major version the package was built against.
    pub contract: u32,
    /// Contract methods the package implements.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Input-content categories this job reads ("interest set").
    #[serde(default)]
    pub categories: Vec<String>,
    /// Inputs that must be present in the enabled set before this job runs.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Enabled-at-start flag; the user's persisted preference wins.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Argv for "run your changes now, do not export yet".
    pub command: Vec<String>,
    /// Optional argv for the job's own needs-patch predicate.
    /// Exit 0 means "patch needed"; absent means no opinion.
    #[serde(default)]
    pub probe_command: Vec<String>,
    /// Optional argv invoked before the job runs.
    #[serde(default)]
    pub on_start_command: Vec<String>,
    /// Optional argv invoked after the job finishes; receives `success` or
    /// `failure` as its final argument.
    #[serde(default)]
    pub on_exit_command: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl Manifest {
    /// Load and validate a manifest from a package directory.
    pub fn load(package_dir: &Path) -> Result<Self> {
        let path = package_dir.join(MANIFEST_FILE);
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let manifest: Manifest =
            toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
        manifest
            .validate()
            .with_context(|| format!("validate {}", path.display()))?;
        Ok(manifest)
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn parse_str(contents: &str) -> Result<Self> {
        let manifest: Manifest = toml::from_str(contents).context("parse manifest")?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("name must be non-empty");
        }
        if self.artifact.trim().is_empty() {
            bail!("artifact must be non-empty");
        }
        if self.version.trim().is_empty() {
            bail!("version must be non-empty");
        }
        if self.contract == 0 {
            bail!("contract must be > 0");
        }
        if self.command.is_empty() || self.command[0].trim().is_empty() {
            bail!("command must be a non-empty array");
        }
        for (field, argv) in [
            ("probe_command", &self.probe_command),
            ("on_start_command", &self.on_start_command),
            ("on_exit_command", &self.on_exit_command),
        ] {
            if !argv.is_empty() && argv[0].trim().is_empty() {
                bail!("{field} must start with a program name");
            }
        }
        Ok(())
    }

    /// Whether this package speaks the host's contract major version.
    pub fn contract_compatible(&self) -> bool {
        self.contract == CONTRACT_VERSION
    }

    /// Required capabilities this package does not implement.
    pub fn missing_capabilities(&self) -> Vec<&'static str> {
        REQUIRED_CAPABILITIES
            .iter()
            .copied()
            .filter(|required| {
                !self
                    .capabilities
                    .iter()
                    .any(|cap| cap.eq_ignore_ascii_case(required))
            })
            .collect()
    }
}
