use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context, Result};
use packrestore_core::{PackageArchive, PackageIdentity, RestoreError};
use tracing::{debug, warn};

use crate::fs_utils::{remove_dir_if_exists, write_atomic};
use crate::locks::KeyedLocks;

pub const DEFAULT_MACHINE_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub identity: PackageIdentity,
    pub blob_path: PathBuf,
    pub fetched_at: SystemTime,
}

/// Transient download cache shared by every project of one invocation.
///
/// Entries expire after the configured TTL. A fetch for a given identity is
/// single-flight: concurrent callers wait for the first and then read its
/// entry. `clear` waits for in-flight fetches and blocks new ones while it
/// runs.
#[derive(Debug)]
pub struct MachineCache {
    root: PathBuf,
    ttl: Duration,
    in_flight: KeyedLocks,
    clearing: RwLock<()>,
}

impl MachineCache {
    pub fn new(root: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            root: root.into(),
            ttl,
            in_flight: KeyedLocks::default(),
            clearing: RwLock::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn entry_path(&self, identity: &PackageIdentity) -> PathBuf {
        self.root
            .join(identity.id.to_lower())
            .join(identity.nupkg_file_name())
    }

    /// Metadata for a live entry; expired entries report `None`.
    pub fn entry(&self, identity: &PackageIdentity) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(identity);
        if !path.is_file() {
            return Ok(None);
        }
        let fetched_at = fs::metadata(&path)
            .and_then(|metadata| metadata.modified())
            .with_context(|| format!("failed reading cache entry metadata: {}", path.display()))?;
        let age = SystemTime::now()
            .duration_since(fetched_at)
            .unwrap_or_default();
        if age >= self.ttl {
            debug!(package = %identity, age_secs = age.as_secs(), "machine cache entry expired");
            return Ok(None);
        }
        Ok(Some(CacheEntry {
            identity: identity.clone(),
            blob_path: path,
            fetched_at,
        }))
    }

    /// Cached bytes, or `None` on a miss. An unreadable or corrupt entry is
    /// removed and reported as a miss.
    pub fn try_get(&self, identity: &PackageIdentity) -> Result<Option<Vec<u8>>> {
        let _shared = self
            .clearing
            .read()
            .map_err(|_| anyhow!("machine cache lock poisoned"))?;
        self.read_entry(identity)
    }

    pub fn put(&self, identity: &PackageIdentity, bytes: &[u8]) -> Result<PathBuf> {
        let _shared = self
            .clearing
            .read()
            .map_err(|_| anyhow!("machine cache lock poisoned"))?;
        let path = self.entry_path(identity);
        write_atomic(&path, bytes)?;
        Ok(path)
    }

    /// Returns the cached bytes or runs `fetch` once for all concurrent
    /// callers asking for the same identity.
    pub fn get_or_fetch<F>(&self, identity: &PackageIdentity, fetch: F) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        let _shared = self
            .clearing
            .read()
            .map_err(|_| anyhow!("machine cache lock poisoned"))?;
        self.in_flight.run(&cache_key(identity), || {
            if let Some(bytes) = self.read_entry(identity)? {
                debug!(package = %identity, "machine cache hit");
                return Ok(bytes);
            }

            let bytes = fetch()?;
            write_atomic(&self.entry_path(identity), &bytes)?;
            Ok(bytes)
        })
    }

    /// Removes every entry. Runs exclusively with respect to fetches on this
    /// instance.
    pub fn clear(&self) -> Result<()> {
        let _exclusive = self
            .clearing
            .write()
            .map_err(|_| anyhow!("machine cache lock poisoned"))?;
        remove_dir_if_exists(&self.root)?;
        debug!(root = %self.root.display(), "machine cache cleared");
        Ok(())
    }

    fn read_entry(&self, identity: &PackageIdentity) -> Result<Option<Vec<u8>>> {
        let Some(entry) = self.entry(identity)? else {
            return Ok(None);
        };
        let bytes = match fs::read(&entry.blob_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.discard(identity, &entry.blob_path, &err.to_string());
                return Ok(None);
            }
        };
        if let Err(err) = PackageArchive::from_bytes(bytes.clone()) {
            self.discard(identity, &entry.blob_path, &format!("{err:#}"));
            return Ok(None);
        }
        Ok(Some(bytes))
    }

    fn discard(&self, identity: &PackageIdentity, path: &Path, message: &str) {
        let corrupted = RestoreError::CorruptedCacheEntry {
            path: path.to_path_buf(),
            message: message.to_string(),
        };
        warn!(package = %identity, error = %corrupted, "discarding machine cache entry");
        let _ = fs::remove_file(path);
    }
}

fn cache_key(identity: &PackageIdentity) -> String {
    format!(
        "{}/{}",
        identity.id.to_lower(),
        identity.version.to_normalized_string().to_ascii_lowercase()
    )
}
