mod loader;
mod packages_config;
mod paths;
mod project_json;
mod solution;
mod types;
mod walker;

pub use loader::{MsBuildProjectLoader, ProjectLoader};
pub use packages_config::{
    find_packages_config, parse_packages_config, read_packages_config, solution_packages_config,
};
pub use paths::{normalize_path, relative_path, resolve_include};
pub use project_json::{parse_project_json, read_project_json, ProjectJson};
pub use solution::{parse_solution, read_solution};
pub use types::{
    project_name, PackageReference, PackagesConfigEntry, ProjectFramework, ProjectNode,
    ProjectReference, ProjectStyle,
};
pub use walker::{
    closure_timeout, walk_projects, ProjectClosure, SkippedProject, WalkOptions, MIN_CLOSURE_TIMEOUT,
};

#[cfg(test)]
mod tests;
