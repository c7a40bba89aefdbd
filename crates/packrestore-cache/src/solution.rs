use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use packrestore_core::{PackageArchive, PackageIdentity};
use tracing::info;

use crate::fs_utils::{remove_dir_if_exists, write_atomic};
use crate::locks::KeyedLocks;

/// Side-by-side `packages/` folder used by packages.config projects:
/// `{id}.{version}/{id}.{version}.nupkg` plus the extracted content. The
/// nupkg is written last and marks a complete install.
#[derive(Debug)]
pub struct PackagesFolder {
    root: PathBuf,
    installs: KeyedLocks,
}

impl PackagesFolder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            installs: KeyedLocks::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn package_dir(&self, identity: &PackageIdentity) -> PathBuf {
        self.root.join(identity.file_stem())
    }

    pub fn nupkg_path(&self, identity: &PackageIdentity) -> PathBuf {
        self.package_dir(identity)
            .join(format!("{}.nupkg", identity.file_stem()))
    }

    pub fn exists(&self, identity: &PackageIdentity) -> bool {
        self.nupkg_path(identity).is_file()
    }

    /// Returns `false` when the package was already present.
    pub fn install(&self, identity: &PackageIdentity, bytes: &[u8]) -> Result<bool> {
        self.installs.run(&identity.file_stem().to_ascii_lowercase(), || {
            if self.exists(identity) {
                return Ok(false);
            }

            let archive = PackageArchive::from_bytes(bytes.to_vec())
                .with_context(|| format!("failed to read package '{identity}'"))?;
            let dir = self.package_dir(identity);
            remove_dir_if_exists(&dir)?;
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create package dir: {}", dir.display()))?;
            archive
                .extract_to(&dir)
                .with_context(|| format!("failed to extract package '{identity}'"))?;
            write_atomic(&self.nupkg_path(identity), bytes)?;
            info!(package = %identity, path = %dir.display(), "installed package into packages folder");
            Ok(true)
        })
    }

    /// Directory names of complete installs, sorted.
    pub fn installed(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("failed reading directory: {}", self.root.display()))?
        {
            let entry = entry
                .with_context(|| format!("failed reading directory: {}", self.root.display()))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.path().join(format!("{name}.nupkg")).is_file() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}
