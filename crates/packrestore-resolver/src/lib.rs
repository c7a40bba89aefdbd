mod order;
mod provider;
mod resolve;
mod selection;
mod types;
mod validation;
mod walk;

pub use provider::PackageProvider;
pub use resolve::{resolve_restore_graph, ResolveOptions};
pub use selection::{select_assets, SelectedAssets};
pub use types::{
    FrameworkRequest, LibraryKind, LibraryRecord, PackageRequest, ProjectDependency,
    ResolvedGraph, ResolvedTarget, RestoreRequest, TargetLibrary,
};
pub use validation::{check_min_client_version, dedupe_pinned_packages};
