//! Filesystem helpers shared by the storage modules.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::errors::{CeresError, Result};

// Rewrites a file atomically: the content lands in a temp file in
// the same directory, then moves over the target. The temp name is
// dot-prefixed and so invisible to directory scans; a leftover from
// an interrupted rewrite is harmless.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| CeresError::Path(path.to_path_buf()))?;
    let mut tmp: NamedTempFile = tempfile::Builder::new()
        .prefix(".tmp-")
        .tempfile_in(dir)
        .map_err(|e| CeresError::at_path(dir, e))?;

    tmp.write_all(contents.as_bytes())
        .map_err(|e| CeresError::at_path(path, e))?;
    tmp.persist(path)
        .map_err(|e| CeresError::at_path(path, e.error))?;
    Ok(())
}

// Lists the visible entry names of a directory in sorted order.
// Entries starting with '.' (registries, temp files) are not part of
// the data namespace and are skipped.
pub(crate) fn visible_entries(dir: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(dir).map_err(|e| CeresError::at_path(dir, e))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| CeresError::at_path(dir, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with('.') {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}
