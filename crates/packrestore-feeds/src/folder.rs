use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use packrestore_core::{PackageId, PackageIdentity, PackageVersion, RestoreError};
use tracing::debug;

use crate::feed::FeedClient;
use crate::PackageSource;

/// A directory used as a feed. Both the flat layout (`{id}.{version}.nupkg`)
/// and the hierarchical one (`{id}/{version}/*.nupkg`) are read.
pub struct LocalFolderFeed {
    source: PackageSource,
    root: PathBuf,
}

impl LocalFolderFeed {
    pub fn new(source: PackageSource) -> Self {
        let location = source
            .location
            .strip_prefix("file://")
            .unwrap_or(&source.location)
            .to_string();
        Self {
            source,
            root: PathBuf::from(location),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_root(&self) -> Result<()> {
        if self.root.is_dir() {
            return Ok(());
        }
        Err(RestoreError::Network {
            url: self.root.display().to_string(),
            message: "source directory does not exist".to_string(),
        }
        .into())
    }

    /// Every `.nupkg` for `id` with the version it holds.
    fn packages_for(&self, id: &PackageId) -> Result<Vec<(PackageVersion, PathBuf)>> {
        self.ensure_root()?;
        let prefix = format!("{}.", id.to_lower());
        let mut found = Vec::new();

        for entry in read_dir_sorted(&self.root)? {
            let name = entry
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            let lower = name.to_ascii_lowercase();

            if entry.is_file() {
                let Some(stem) = lower.strip_suffix(".nupkg") else {
                    continue;
                };
                if lower.ends_with(".symbols.nupkg") {
                    continue;
                }
                if let Some(version) = stem
                    .strip_prefix(&prefix)
                    .and_then(|raw| PackageVersion::parse(raw).ok())
                {
                    found.push((version, entry));
                }
                continue;
            }

            if entry.is_dir() && lower == id.to_lower() {
                for version_dir in read_dir_sorted(&entry)? {
                    if !version_dir.is_dir() {
                        continue;
                    }
                    let Some(version) = version_dir
                        .file_name()
                        .and_then(|name| PackageVersion::parse(&name.to_string_lossy()).ok())
                    else {
                        continue;
                    };
                    if let Some(nupkg) = read_dir_sorted(&version_dir)?.into_iter().find(|path| {
                        path.is_file()
                            && path
                                .extension()
                                .is_some_and(|ext| ext.eq_ignore_ascii_case("nupkg"))
                    }) {
                        found.push((version, nupkg));
                    }
                }
            }
        }

        found.sort_by(|left, right| left.0.cmp(&right.0));
        Ok(found)
    }
}

impl FeedClient for LocalFolderFeed {
    fn source(&self) -> &PackageSource {
        &self.source
    }

    fn list_versions(&self, id: &PackageId) -> Result<Vec<PackageVersion>> {
        let mut versions = self
            .packages_for(id)?
            .into_iter()
            .map(|(version, _)| version)
            .collect::<Vec<_>>();
        versions.dedup();
        Ok(versions)
    }

    fn fetch(&self, identity: &PackageIdentity) -> Result<Option<Vec<u8>>> {
        let Some((_, path)) = self
            .packages_for(&identity.id)?
            .into_iter()
            .find(|(version, _)| version == &identity.version)
        else {
            return Ok(None);
        };
        debug!(path = %path.display(), "reading package from folder feed");
        fs::read(&path)
            .map(Some)
            .with_context(|| format!("failed to read package: {}", path.display()))
    }
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("failed reading directory: {}", dir.display()))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("failed reading directory: {}", dir.display()))?;
    entries.sort();
    Ok(entries)
}
