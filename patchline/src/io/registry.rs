//! Job discovery over a directory of candidate patcher packages.
//!
//! Discovery is tolerant by construction: a malformed or incompatible
//! candidate is logged and skipped, never fatal to the remaining packages.
//! Stale-but-recognizable packages (valid manifest, missing a capability the
//! host invokes) land on the blocked list so they are reported instead of
//! silently vanishing.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::ordering::apply_order;
use crate::core::types::fold_id;
use crate::io::manifest::Manifest;

/// First-party package names never treated as candidate jobs.
pub const FIRST_PARTY: [&str; 2] = ["patchline", "patchline-merge"];

/// A discovered, contract-conformant job unit.
///
/// Re-discovered every run; never persisted. Equality is by case-folded
/// declared name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub name: String,
    pub artifact: String,
    pub version: String,
    /// Case-folded interest categories.
    pub categories: BTreeSet<String>,
    pub requires: Vec<String>,
    pub enabled_at_start: bool,
    pub package_dir: PathBuf,
    pub command: Vec<String>,
    pub probe_command: Vec<String>,
    pub on_start_command: Vec<String>,
    pub on_exit_command: Vec<String>,
}

impl Job {
    fn from_manifest(manifest: Manifest, package_dir: PathBuf) -> Self {
        Self {
            name: manifest.name,
            artifact: manifest.artifact,
            version: manifest.version,
            categories: manifest.categories.iter().map(|c| fold_id(c)).collect(),
            requires: manifest.requires,
            enabled_at_start: manifest.enabled,
            package_dir,
            command: manifest.command,
            probe_command: manifest.probe_command,
            on_start_command: manifest.on_start_command,
            on_exit_command: manifest.on_exit_command,
        }
    }
}

/// A package that described itself but no longer satisfies the contract
/// methods the host invokes. Reported, never executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedJob {
    pub name: String,
    pub package_dir: PathBuf,
    pub reason: String,
}

/// A candidate that failed the handshake entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPackage {
    pub package_dir: PathBuf,
    pub reason: String,
}

/// Everything one discovery pass produced.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Valid jobs, deduplicated, in final execution order.
    pub jobs: Vec<Job>,
    pub blocked: Vec<BlockedJob>,
    pub skipped: Vec<SkippedPackage>,
}

/// Build the case-insensitive exclusion set: the hardcoded first-party
/// identifiers plus lines from the block-file (`//` comments stripped).
pub fn load_exclusions(blocklist_path: &Path) -> Result<BTreeSet<String>> {
    let mut exclusions: BTreeSet<String> =
        FIRST_PARTY.iter().map(|name| fold_id(name)).collect();

    if blocklist_path.exists() {
        let contents = fs::read_to_string(blocklist_path)
            .with_context(|| format!("read {}", blocklist_path.display()))?;
        for line in contents.lines() {
            let line = match line.find("//") {
                Some(index) => &line[..index],
                None => line,
            };
            let line = line.trim();
            if !line.is_empty() {
                exclusions.insert(fold_id(line));
            }
        }
    }

    Ok(exclusions)
}

/// Scan `packages_dir` for candidate packages and probe each one.
///
/// The scan order is sorted by directory name so deduplication ("first
/// encountered wins") is deterministic. Job ordering against the external
/// load order is applied afterward via [`order_jobs`].
pub fn discover_jobs(packages_dir: &Path, exclusions: &BTreeSet<String>) -> Result<Discovery> {
    let mut discovery = Discovery::default();

    if !packages_dir.is_dir() {
        warn!(path = %packages_dir.display(), "packages directory missing, nothing to discover");
        return Ok(discovery);
    }

    let mut candidates: Vec<PathBuf> = fs::read_dir(packages_dir)
        .with_context(|| format!("scan {}", packages_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    candidates.sort();

    let mut seen: BTreeSet<String> = BTreeSet::new();
    for package_dir in candidates {
        let dir_name = package_dir
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        if exclusions.contains(&fold_id(&dir_name)) {
            debug!(package = %dir_name, "excluded package");
            continue;
        }

        let manifest = match Manifest::load(&package_dir) {
            Ok(manifest) => manifest,
            Err(err) => {
                warn!(package = %dir_name, err = %err, "handshake failed, skipping package");
                discovery.skipped.push(SkippedPackage {
                    package_dir,
                    reason: format!("{err:#}"),
                });
                continue;
            }
        };

        if !manifest.contract_compatible() {
            warn!(package = %dir_name, contract = manifest.contract, "incompatible contract, skipping package");
            discovery.skipped.push(SkippedPackage {
                package_dir,
                reason: format!("contract version {} unsupported", manifest.contract),
            });
            continue;
        }

        let missing = manifest.missing_capabilities();
        if !missing.is_empty() {
            discovery.blocked.push(BlockedJob {
                name: manifest.name.clone(),
                package_dir,
                reason: format!("missing capabilities: {}", missing.join(", ")),
            });
            continue;
        }

        if !seen.insert(fold_id(&manifest.name)) {
            debug!(package = %dir_name, name = %manifest.name, "duplicate job name, keeping first");
            continue;
        }

        discovery.jobs.push(Job::from_manifest(manifest, package_dir));
    }

    Ok(discovery)
}

/// Order discovered jobs against the external load order (stable, idempotent).
pub fn order_jobs(jobs: Vec<Job>, load_order: &[String]) -> Vec<Job> {
    apply_order(jobs, load_order, |job| job.artifact.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_package(root: &Path, dir: &str, manifest: &str) {
        let package = root.join(dir);
        fs::create_dir_all(&package).expect("create package");
        fs::write(package.join("patcher.toml"), manifest).expect("write manifest");
    }

    fn manifest(name: &str, artifact: &str) -> String {
        format!(
            r#"
                name = "{name}"
                artifact = "{artifact}"
                version = "1.0.0"
                contract = 1
                capabilities = ["describe", "run"]
                command = ["run.sh"]
            "#
        )
    }

    #[test]
    fn discovers_valid_packages_in_sorted_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_package(temp.path(), "b-pkg", &manifest("beta", "b.out"));
        write_package(temp.path(), "a-pkg", &manifest("alpha", "a.out"));

        let discovery = discover_jobs(temp.path(), &BTreeSet::new()).expect("discover");
        let names: Vec<&str> = discovery.jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert!(discovery.blocked.is_empty());
        assert!(discovery.skipped.is_empty());
    }

    /// A malformed candidate never aborts discovery of the rest.
    #[test]
    fn malformed_manifest_is_skipped_not_fatal() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_package(temp.path(), "bad", "this is { not toml");
        write_package(temp.path(), "good", &manifest("good", "good.out"));

        let discovery = discover_jobs(temp.path(), &BTreeSet::new()).expect("discover");
        assert_eq!(discovery.jobs.len(), 1);
        assert_eq!(discovery.jobs[0].name, "good");
        assert_eq!(discovery.skipped.len(), 1);
    }

    #[test]
    fn missing_manifest_is_skipped() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("empty-pkg")).expect("create");
        write_package(temp.path(), "good", &manifest("good", "good.out"));

        let discovery = discover_jobs(temp.path(), &BTreeSet::new()).expect("discover");
        assert_eq!(discovery.jobs.len(), 1);
        assert_eq!(discovery.skipped.len(), 1);
    }

    #[test]
    fn incompatible_contract_is_skipped() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_package(
            temp.path(),
            "future",
            r#"
                name = "future"
                artifact = "f.out"
                version = "1.0"
                contract = 9
                capabilities = ["describe", "run"]
                command = ["run.sh"]
            "#,
        );

        let discovery = discover_jobs(temp.path(), &BTreeSet::new()).expect("discover");
        assert!(discovery.jobs.is_empty());
        assert_eq!(discovery.skipped.len(), 1);
        assert!(discovery.skipped[0].reason.contains("contract"));
    }

    /// Stale packages are reported as blocked, not silently dropped.
    #[test]
    fn missing_capability_lands_on_blocked_list() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_package(
            temp.path(),
            "stale",
            r#"
                name = "stale"
                artifact = "s.out"
                version = "1.0"
                contract = 1
                capabilities = ["describe"]
                command = ["run.sh"]
            "#,
        );

        let discovery = discover_jobs(temp.path(), &BTreeSet::new()).expect("discover");
        assert!(discovery.jobs.is_empty());
        assert_eq!(discovery.blocked.len(), 1);
        assert!(discovery.blocked[0].reason.contains("run"));
    }

    #[test]
    fn duplicate_names_keep_first_encountered() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_package(temp.path(), "01-first", &manifest("Same Name", "first.out"));
        write_package(temp.path(), "02-second", &manifest("same name", "second.out"));

        let discovery = discover_jobs(temp.path(), &BTreeSet::new()).expect("discover");
        assert_eq!(discovery.jobs.len(), 1);
        assert_eq!(discovery.jobs[0].artifact, "first.out");
    }

    #[test]
    fn exclusions_match_case_insensitively() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_package(temp.path(), "Patchline", &manifest("self", "self.out"));
        write_package(temp.path(), "Vendor-Tool", &manifest("vendor", "v.out"));
        write_package(temp.path(), "ok", &manifest("ok", "ok.out"));

        let mut exclusions = load_exclusions(Path::new("/nonexistent")).expect("exclusions");
        exclusions.insert("vendor-tool".to_string());

        let discovery = discover_jobs(temp.path(), &exclusions).expect("discover");
        assert_eq!(discovery.jobs.len(), 1);
        assert_eq!(discovery.jobs[0].name, "ok");
    }

    #[test]
    fn block_file_lines_strip_comments() {
        let temp = tempfile::tempdir().expect("tempdir");
        let blocklist = temp.path().join("blocklist.txt");
        fs::write(
            &blocklist,
            "// first-party helpers\nLegacy-Pack // superseded\n\n  Spaced \n",
        )
        .expect("write blocklist");

        let exclusions = load_exclusions(&blocklist).expect("exclusions");
        assert!(exclusions.contains("legacy-pack"));
        assert!(exclusions.contains("spaced"));
        assert!(exclusions.contains("patchline"));
        assert!(exclusions.contains("patchline-merge"));
    }

    #[test]
    fn missing_packages_dir_discovers_nothing() {
        let discovery =
            discover_jobs(Path::new("/nonexistent/pkgs"), &BTreeSet::new()).expect("discover");
        assert!(discovery.jobs.is_empty());
    }

    #[test]
    fn order_jobs_follows_external_list_then_discovery_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_package(temp.path(), "a", &manifest("a", "a.out"));
        write_package(temp.path(), "b", &manifest("b", "b.out"));
        write_package(temp.path(), "c", &manifest("c", "c.out"));

        let discovery = discover_jobs(temp.path(), &BTreeSet::new()).expect("discover");
        let order = vec!["B.OUT".to_string()];
        let ordered = order_jobs(discovery.jobs, &order);
        let artifacts: Vec<&str> = ordered.iter().map(|j| j.artifact.as_str()).collect();
        assert_eq!(artifacts, vec!["b.out", "a.out", "c.out"]);
    }
}
