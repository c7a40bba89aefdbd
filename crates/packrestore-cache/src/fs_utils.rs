use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Writes through a `.part` sibling and renames it into place, so readers
/// never see a half-written file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create cache dir: {}", parent.display()))?;
    }

    let part_path = path.with_file_name(format!(
        "{}.part",
        path.file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("entry")
    ));
    if let Err(err) = fs::write(&part_path, bytes) {
        let _ = fs::remove_file(&part_path);
        return Err(err).with_context(|| format!("failed to write file: {}", part_path.display()));
    }

    if path.exists() {
        fs::remove_file(path)
            .with_context(|| format!("failed to replace file: {}", path.display()))?;
    }
    fs::rename(&part_path, path)
        .with_context(|| format!("failed to move file into place: {}", path.display()))
}

pub(crate) fn remove_dir_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)
            .with_context(|| format!("failed to remove directory: {}", path.display()))?;
    }
    Ok(())
}

/// Files below `root` as sorted `/`-separated relative paths.
pub(crate) fn relative_files(root: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let mut pending = vec![PathBuf::new()];
    while let Some(relative) = pending.pop() {
        let dir = root.join(&relative);
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("failed reading directory: {}", dir.display()))?
        {
            let entry =
                entry.with_context(|| format!("failed reading directory: {}", dir.display()))?;
            let child = relative.join(entry.file_name());
            if entry.path().is_dir() {
                pending.push(child);
            } else {
                let parts = child
                    .components()
                    .map(|part| part.as_os_str().to_string_lossy().to_string())
                    .collect::<Vec<_>>();
                out.push(parts.join("/"));
            }
        }
    }
    out.sort();
    Ok(out)
}
