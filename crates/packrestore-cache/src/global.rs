use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use packrestore_core::{
    PackageArchive, PackageId, PackageIdentity, PackageManifest, PackageVersion, RestoreError,
};
use packrestore_security::sha512_base64;
use tracing::{debug, info, warn};

use crate::fs_utils::{relative_files, remove_dir_if_exists, write_atomic};
use crate::locks::KeyedLocks;

/// A package as laid out in a packages folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    /// Identity as declared by the package's own manifest.
    pub identity: PackageIdentity,
    pub directory: PathBuf,
    pub manifest: PackageManifest,
    /// Content files relative to `directory`, `/`-separated and sorted.
    pub files: Vec<String>,
    pub sha512: String,
}

/// Persistent folder keyed by `{id}/{version}/` (both lowercase).
///
/// The `{id}.{version}.nupkg.sha512` file is written last and marks a
/// complete install; a directory without it, or whose manifest no longer
/// reads, is treated as absent and reinstalled. The same type reads
/// fallback folders, which are never written.
#[derive(Debug)]
pub struct GlobalPackagesFolder {
    root: PathBuf,
    installs: KeyedLocks,
}

impl GlobalPackagesFolder {
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
        self.root
            .join(identity.id.to_lower())
            .join(identity.version.to_normalized_string().to_ascii_lowercase())
    }

    pub fn nupkg_path(&self, identity: &PackageIdentity) -> PathBuf {
        self.package_dir(identity).join(identity.nupkg_file_name())
    }

    pub fn hash_path(&self, identity: &PackageIdentity) -> PathBuf {
        self.package_dir(identity)
            .join(format!("{}.sha512", identity.nupkg_file_name()))
    }

    pub fn nuspec_path(&self, identity: &PackageIdentity) -> PathBuf {
        self.package_dir(identity)
            .join(format!("{}.nuspec", identity.id.to_lower()))
    }

    pub fn exists(&self, identity: &PackageIdentity) -> bool {
        self.hash_path(identity).is_file()
    }

    /// Versions of `id` with a completed install.
    pub fn versions(&self, id: &PackageId) -> Result<Vec<PackageVersion>> {
        let dir = self.root.join(id.to_lower());
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("failed reading directory: {}", dir.display()))?
        {
            let entry =
                entry.with_context(|| format!("failed reading directory: {}", dir.display()))?;
            let Ok(version) = PackageVersion::parse(&entry.file_name().to_string_lossy()) else {
                continue;
            };
            if self.exists(&PackageIdentity::new(id.clone(), version.clone())) {
                versions.push(version);
            }
        }
        versions.sort();
        Ok(versions)
    }

    /// The installed package, or `None` when missing, incomplete or corrupt.
    pub fn installed(&self, identity: &PackageIdentity) -> Result<Option<InstalledPackage>> {
        if !self.exists(identity) {
            return Ok(None);
        }
        match self.read_installed(identity) {
            Ok(installed) => Ok(Some(installed)),
            Err(err) => {
                let corrupted = RestoreError::CorruptedCacheEntry {
                    path: self.package_dir(identity),
                    message: format!("{err:#}"),
                };
                warn!(package = %identity, error = %corrupted, "ignoring corrupted package install");
                Ok(None)
            }
        }
    }

    /// Installs `bytes` as `identity`. Installing an identity that is
    /// already complete is a no-op that leaves every file untouched.
    pub fn install(&self, identity: &PackageIdentity, bytes: Vec<u8>) -> Result<InstalledPackage> {
        self.install_with(identity, || Ok(bytes))
    }

    /// Like [`install`](Self::install) but only calls `fetch` when the
    /// package is not already installed. Concurrent installs of one identity
    /// fetch once.
    pub fn install_with<F>(&self, identity: &PackageIdentity, fetch: F) -> Result<InstalledPackage>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        self.installs.run(&identity.nupkg_file_name(), || {
            if let Some(installed) = self.installed(identity)? {
                debug!(package = %identity, "already installed");
                return Ok(installed);
            }

            let archive = PackageArchive::from_bytes(fetch()?)
                .with_context(|| format!("failed to read package '{identity}'"))?;
            if archive.identity() != *identity {
                return Err(RestoreError::Protocol {
                    url: identity.to_string(),
                    message: format!("downloaded package is '{}'", archive.identity()),
                }
                .into());
            }

            let dir = self.package_dir(identity);
            remove_dir_if_exists(&dir)?;
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create package dir: {}", dir.display()))?;
            archive
                .extract_to(&dir)
                .with_context(|| format!("failed to extract package '{identity}'"))?;
            write_atomic(&self.nupkg_path(identity), archive.bytes())?;
            write_atomic(
                &self.nuspec_path(identity),
                archive.manifest().to_nuspec_xml()?.as_bytes(),
            )?;
            write_atomic(
                &self.hash_path(identity),
                sha512_base64(archive.bytes()).as_bytes(),
            )?;
            info!(package = %identity, path = %dir.display(), "installed package");

            self.read_installed(identity)
        })
    }

    /// Removes every package below the root.
    pub fn clear(&self) -> Result<()> {
        remove_dir_if_exists(&self.root)
    }

    fn read_installed(&self, identity: &PackageIdentity) -> Result<InstalledPackage> {
        let nuspec = self.nuspec_path(identity);
        let content = fs::read_to_string(&nuspec)
            .with_context(|| format!("failed reading manifest: {}", nuspec.display()))?;
        let manifest = PackageManifest::parse(&content)
            .with_context(|| format!("failed parsing manifest: {}", nuspec.display()))?;
        let hash_path = self.hash_path(identity);
        let sha512 = fs::read_to_string(&hash_path)
            .with_context(|| format!("failed reading package hash: {}", hash_path.display()))?
            .trim()
            .to_string();
        if sha512.is_empty() {
            return Err(anyhow!("empty package hash: {}", hash_path.display()));
        }

        let dir = self.package_dir(identity);
        let bookkeeping = [
            identity.nupkg_file_name(),
            format!("{}.sha512", identity.nupkg_file_name()),
            format!("{}.nuspec", identity.id.to_lower()),
        ];
        let files = relative_files(&dir)?
            .into_iter()
            .filter(|file| !bookkeeping.iter().any(|name| name == file))
            .filter(|file| !file.ends_with(".part"))
            .collect();

        Ok(InstalledPackage {
            identity: manifest.identity(),
            directory: dir,
            manifest,
            files,
            sha512,
        })
    }
}
