use anyhow::Result;
use packrestore_cache::{InstalledPackage, PackageFetcher, SelectedPackage};
use packrestore_core::{PackageId, VersionConstraint};

/// Where the resolver gets versions and package contents from.
pub trait PackageProvider: Sync {
    fn select(&self, id: &PackageId, constraint: &VersionConstraint) -> Result<Option<SelectedPackage>>;

    /// Makes the selected package available on disk.
    fn load(&self, selected: &SelectedPackage) -> Result<InstalledPackage>;
}

impl PackageProvider for PackageFetcher {
    fn select(&self, id: &PackageId, constraint: &VersionConstraint) -> Result<Option<SelectedPackage>> {
        self.resolve(id, constraint)
    }

    fn load(&self, selected: &SelectedPackage) -> Result<InstalledPackage> {
        self.ensure_installed(&selected.identity, selected.source_index)
    }
}
