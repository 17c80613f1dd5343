//! Data-access collaborator: the orchestrator's only window onto the input
//! files.
//!
//! The [`Catalog`] trait is deliberately coarse. The orchestrator never
//! parses input files itself; it needs an input's identity, a cheap
//! changed-signal, the categories it provides, and the masters an artifact
//! declares. Tests substitute scripted implementations.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::core::types::{ArtifactMasters, InputStamp, Snapshot, fold_id};
use crate::io::load_order::read_load_order;

/// Abstraction over the data-access library.
pub trait Catalog {
    /// Enabled inputs with fingerprints, in enabled-input order.
    fn enabled_inputs(&self) -> Result<Vec<InputStamp>>;

    /// Ordered masters the given output artifact declares (empty if the
    /// artifact does not exist yet).
    fn masters_of(&self, artifact: &str) -> Result<Vec<String>>;

    /// Content categories the given input provides.
    fn categories_of(&self, input: &str) -> Result<BTreeSet<String>>;

    /// Load the given content categories into memory. Idempotent from the
    /// caller's perspective; the orchestrator guards re-entry anyway.
    fn import(&mut self, categories: &BTreeSet<String>) -> Result<()>;
}

/// Filesystem-backed catalog over a data directory and an output directory.
///
/// - enabled inputs: the load-order list filtered to files that exist;
/// - fingerprints: mtime in whole seconds;
/// - masters: `<artifact>.masters` sidecar next to the artifact;
/// - categories: optional `catalog.toml` index in the data directory.
pub struct FsCatalog {
    data_dir: PathBuf,
    output_dir: PathBuf,
    index: Option<CategoryIndex>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CategoryIndex {
    #[serde(default)]
    inputs: BTreeMap<String, IndexEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct IndexEntry {
    #[serde(default)]
    categories: Vec<String>,
}

impl FsCatalog {
    pub fn new(data_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            output_dir: output_dir.into(),
            index: None,
        }
    }

    fn index(&self) -> CategoryIndex {
        if let Some(index) = &self.index {
            return index.clone();
        }
        load_index(&self.data_dir)
    }
}

fn load_index(data_dir: &Path) -> CategoryIndex {
    let path = data_dir.join("catalog.toml");
    if !path.exists() {
        return CategoryIndex::default();
    }
    match fs::read_to_string(&path)
        .map_err(anyhow::Error::from)
        .and_then(|contents| toml::from_str(&contents).map_err(anyhow::Error::from))
    {
        Ok(index) => index,
        Err(err) => {
            warn!(path = %path.display(), err = %err, "unreadable category index, treating as empty");
            CategoryIndex::default()
        }
    }
}

fn mtime_seconds(path: &Path) -> Result<u64> {
    let metadata =
        fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    let modified = metadata
        .modified()
        .with_context(|| format!("mtime of {}", path.display()))?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0))
}

impl Catalog for FsCatalog {
    fn enabled_inputs(&self) -> Result<Vec<InputStamp>> {
        let order = read_load_order(&self.data_dir)?;
        let mut inputs = Vec::new();
        for id in order {
            let path = self.data_dir.join(&id);
            if !path.exists() {
                warn!(input = %id, "listed input missing on disk, treating as disabled");
                continue;
            }
            inputs.push(InputStamp {
                fingerprint: mtime_seconds(&path)?,
                id,
            });
        }
        Ok(inputs)
    }

    fn masters_of(&self, artifact: &str) -> Result<Vec<String>> {
        let path = self.output_dir.join(format!("{artifact}.masters"));
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| line.to_string())
            .collect())
    }

    fn categories_of(&self, input: &str) -> Result<BTreeSet<String>> {
        let index = self.index();
        let folded = fold_id(input);
        Ok(index
            .inputs
            .iter()
            .find(|(id, _)| fold_id(id) == folded)
            .map(|(_, entry)| entry.categories.iter().map(|c| fold_id(c)).collect())
            .unwrap_or_default())
    }

    #[instrument(skip_all, fields(categories = categories.len()))]
    fn import(&mut self, categories: &BTreeSet<String>) -> Result<()> {
        // The underlying data library is opaque; loading is coarse. Reading
        // the index up front is the only preparation this backend needs.
        if !self.data_dir.is_dir() {
            anyhow::bail!("data directory missing: {}", self.data_dir.display());
        }
        self.index = Some(load_index(&self.data_dir));
        debug!(data_dir = %self.data_dir.display(), "catalog import complete");
        Ok(())
    }
}

/// Build the fresh run snapshot: enabled inputs plus the masters each of the
/// given artifacts declares.
pub fn snapshot(catalog: &impl Catalog, artifacts: &[String]) -> Result<Snapshot> {
    let inputs = catalog.enabled_inputs()?;
    let mut masters = Vec::new();
    for artifact in artifacts {
        masters.push(ArtifactMasters {
            artifact: artifact.clone(),
            masters: catalog.masters_of(artifact)?,
        });
    }
    Ok(Snapshot { inputs, masters })
}

/// Case-folded input id -> categories, for every enabled input.
pub fn category_map(
    catalog: &impl Catalog,
    inputs: &[InputStamp],
) -> Result<BTreeMap<String, BTreeSet<String>>> {
    let mut map = BTreeMap::new();
    for stamp in inputs {
        map.insert(fold_id(&stamp.id), catalog.categories_of(&stamp.id)?);
    }
    Ok(map)
}
