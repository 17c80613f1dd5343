//! The external load-order list: enabled inputs and their total order.
//!
//! The first existing of two well-known files in the data directory is
//! authoritative; one identifier per line, `#` comments and blank lines
//! ignored. The same list doubles as the enabled-input set.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Well-known order files, in preference order.
pub const ORDER_FILES: [&str; 2] = ["loadorder.txt", "plugins.txt"];

/// Path of the order file that would be used for `data_dir`, if any exists.
pub fn order_file(data_dir: &Path) -> Option<PathBuf> {
    ORDER_FILES
        .iter()
        .map(|name| data_dir.join(name))
        .find(|path| path.exists())
}

/// Read the load order from the preferred existing order file.
///
/// A data directory with neither file yields an empty order (and therefore an
/// empty enabled-input set), which the invalidation engine treats like any
/// other input-set change.
pub fn read_load_order(data_dir: &Path) -> Result<Vec<String>> {
    let Some(path) = order_file(data_dir) else {
        warn!(data_dir = %data_dir.display(), "no load-order file found");
        return Ok(Vec::new());
    };
    let contents = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let order: Vec<String> = contents
        .lines()
        .map(|line| match line.find('#') {
            Some(index) => line[..index].trim(),
            None => line.trim(),
        })
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
        .collect();
    debug!(path = %path.display(), entries = order.len(), "load order read");
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_loadorder_over_plugins() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("loadorder.txt"), "a.pack\n").expect("write");
        fs::write(temp.path().join("plugins.txt"), "b.pack\n").expect("write");

        let order = read_load_order(temp.path()).expect("read");
        assert_eq!(order, vec!["a.pack"]);
    }

    #[test]
    fn falls_back_to_plugins() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("plugins.txt"), "b.pack\n").expect("write");

        let order = read_load_order(temp.path()).expect("read");
        assert_eq!(order, vec!["b.pack"]);
    }

    #[test]
    fn strips_comments_and_blank_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(
            temp.path().join("loadorder.txt"),
            "# header\nbase.pack\n\nextra.pack # trailing\n",
        )
        .expect("write");

        let order = read_load_order(temp.path()).expect("read");
        assert_eq!(order, vec!["base.pack", "extra.pack"]);
    }

    #[test]
    fn missing_files_yield_empty_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let order = read_load_order(temp.path()).expect("read");
        assert!(order.is_empty());
    }
}
