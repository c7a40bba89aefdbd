mod fetcher;
mod fs_utils;
mod global;
mod locks;
mod machine;
mod solution;

pub use fetcher::{PackageFetcher, SelectedPackage};
pub use global::{GlobalPackagesFolder, InstalledPackage};
pub use machine::{CacheEntry, MachineCache, DEFAULT_MACHINE_CACHE_TTL};
pub use solution::PackagesFolder;

#[cfg(test)]
mod tests;
