use std::sync::Arc;

use anyhow::Result;
use packrestore_core::{
    DependencyBehavior, PackageId, PackageIdentity, PackageVersion, VersionConstraint,
};
use packrestore_feeds::SourceAggregator;
use tracing::debug;

use crate::global::{GlobalPackagesFolder, InstalledPackage};
use crate::machine::MachineCache;

/// Version chosen for a request and the source (by position) that offered
/// it; `None` when a local folder answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedPackage {
    pub identity: PackageIdentity,
    pub source_index: Option<usize>,
}

/// Gets packages onto disk: global folder and fallback folders first, then
/// the machine cache, then the sources.
pub struct PackageFetcher {
    global: Arc<GlobalPackagesFolder>,
    fallbacks: Vec<GlobalPackagesFolder>,
    machine_cache: Option<Arc<MachineCache>>,
    aggregator: Arc<SourceAggregator>,
}

impl PackageFetcher {
    pub fn new(global: Arc<GlobalPackagesFolder>, aggregator: Arc<SourceAggregator>) -> Self {
        Self {
            global,
            fallbacks: Vec::new(),
            machine_cache: None,
            aggregator,
        }
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<GlobalPackagesFolder>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    pub fn with_machine_cache(mut self, cache: Arc<MachineCache>) -> Self {
        self.machine_cache = Some(cache);
        self
    }

    pub fn global(&self) -> &GlobalPackagesFolder {
        &self.global
    }

    pub fn fallbacks(&self) -> &[GlobalPackagesFolder] {
        &self.fallbacks
    }

    pub fn machine_cache(&self) -> Option<&MachineCache> {
        self.machine_cache.as_deref()
    }

    pub fn aggregator(&self) -> &SourceAggregator {
        &self.aggregator
    }

    /// Installed copy from the global folder or, failing that, the first
    /// fallback folder that has it.
    pub fn locate(&self, identity: &PackageIdentity) -> Result<Option<InstalledPackage>> {
        if let Some(installed) = self.global.installed(identity)? {
            return Ok(Some(installed));
        }
        for folder in &self.fallbacks {
            if let Some(installed) = folder.installed(identity)? {
                debug!(package = %identity, folder = %folder.root().display(), "found in fallback folder");
                return Ok(Some(installed));
            }
        }
        Ok(None)
    }

    /// Versions of `id` present in any local folder.
    pub fn local_versions(&self, id: &PackageId) -> Result<Vec<PackageVersion>> {
        let mut versions = self.global.versions(id)?;
        for folder in &self.fallbacks {
            versions.extend(folder.versions(id)?);
        }
        versions.sort();
        versions.dedup();
        Ok(versions)
    }

    /// Picks a version for `constraint`. A non-floating constraint whose
    /// lowest applicable version is already on disk is answered locally
    /// without contacting any source.
    pub fn resolve(
        &self,
        id: &PackageId,
        constraint: &VersionConstraint,
    ) -> Result<Option<SelectedPackage>> {
        if !constraint.is_floating() && self.aggregator.behavior() == DependencyBehavior::Lowest {
            if let Some(min) = constraint.min_version().filter(|min| constraint.satisfies(min)) {
                let local = self.local_versions(id)?;
                if local.contains(min) {
                    debug!(id = %id, version = %min, "resolved from local folders");
                    return Ok(Some(SelectedPackage {
                        identity: PackageIdentity::new(id.clone(), min.clone()),
                        source_index: None,
                    }));
                }
            }
        }
        Ok(self
            .aggregator
            .resolve(id, constraint)?
            .map(|remote| SelectedPackage {
                identity: remote.identity,
                source_index: Some(remote.source_index),
            }))
    }

    /// Raw package bytes through the machine cache when one is configured.
    pub fn download(&self, identity: &PackageIdentity, preferred: Option<usize>) -> Result<Vec<u8>> {
        match &self.machine_cache {
            Some(cache) => cache.get_or_fetch(identity, || self.aggregator.fetch(identity, preferred)),
            None => self.aggregator.fetch(identity, preferred),
        }
    }

    /// Makes sure `identity` is available locally, installing it into the
    /// global folder when no local folder has it.
    pub fn ensure_installed(
        &self,
        identity: &PackageIdentity,
        preferred: Option<usize>,
    ) -> Result<InstalledPackage> {
        if let Some(installed) = self.locate(identity)? {
            return Ok(installed);
        }
        self.global
            .install_with(identity, || self.download(identity, preferred))
    }
}
