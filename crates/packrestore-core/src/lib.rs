mod archive;
mod error;
mod framework;
mod identity;
mod manifest;
mod range;
mod version;
pub mod xml;

pub use archive::{PackageArchive, PackageArchiveBuilder};
pub use error::{find_restore_error, RestoreError};
pub use framework::{FrameworkFamily, TargetFramework};
pub use identity::{validate_package_id, PackageId, PackageIdentity};
pub use manifest::{DependencyGroup, PackageDependency, PackageManifest};
pub use range::{DependencyBehavior, FloatBehavior, FloatPolicy, FloatRange, VersionConstraint, VersionRange};
pub use version::PackageVersion;

/// Highest `minClientVersion` a package may declare and still be restored.
pub fn client_compatibility_version() -> PackageVersion {
    PackageVersion::new(6, 12, 0)
}
