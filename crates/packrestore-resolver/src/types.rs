use std::collections::BTreeMap;
use std::path::PathBuf;

use packrestore_core::{PackageId, PackageVersion, TargetFramework, VersionConstraint};

/// A direct package request from a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRequest {
    pub id: PackageId,
    pub constraint: VersionConstraint,
}

impl PackageRequest {
    pub fn new(id: impl Into<PackageId>, constraint: VersionConstraint) -> Self {
        Self {
            id: id.into(),
            constraint,
        }
    }
}

/// A referenced project and the package requests that flow from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDependency {
    pub name: String,
    /// Path relative to the restoring project, `/`-separated.
    pub path: String,
    pub dependencies: Vec<PackageRequest>,
    /// Names of the projects this one references.
    pub references: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameworkRequest {
    pub framework: TargetFramework,
    /// `imports` / `PackageTargetFallback` / `AssetTargetFallback`, in order.
    pub fallbacks: Vec<TargetFramework>,
    pub dependencies: Vec<PackageRequest>,
    pub projects: Vec<ProjectDependency>,
}

impl FrameworkRequest {
    pub fn new(framework: TargetFramework) -> Self {
        Self {
            framework,
            fallbacks: Vec::new(),
            dependencies: Vec::new(),
            projects: Vec::new(),
        }
    }
}

/// Everything one project asks the resolver for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreRequest {
    pub frameworks: Vec<FrameworkRequest>,
    pub runtime_identifiers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LibraryKind {
    Package,
    Project,
}

impl LibraryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Package => "package",
            Self::Project => "project",
        }
    }
}

/// A library shared by every target that uses it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryRecord {
    pub name: String,
    pub version: PackageVersion,
    pub kind: LibraryKind,
    /// `{id}/{version}` (lowercase) below the packages folder, or the
    /// project path.
    pub path: String,
    pub sha512: Option<String>,
    pub files: Vec<String>,
}

impl LibraryRecord {
    /// `{name}/{version}`, the key libraries are stored under.
    pub fn key(&self) -> String {
        library_key(&self.name, &self.version)
    }
}

pub(crate) fn library_key(name: &str, version: &PackageVersion) -> String {
    format!("{name}/{version}")
}

/// One library as seen from one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetLibrary {
    pub name: String,
    pub version: PackageVersion,
    pub kind: LibraryKind,
    /// Dependency name to the requested range.
    pub dependencies: BTreeMap<String, String>,
    pub compile: Vec<String>,
    pub runtime: Vec<String>,
    pub native: Vec<String>,
    pub build: Vec<String>,
    pub build_cross_targeting: Vec<String>,
    /// Framework folder the assets came from.
    pub framework: Option<String>,
}

impl TargetLibrary {
    pub(crate) fn new(name: impl Into<String>, version: PackageVersion, kind: LibraryKind) -> Self {
        Self {
            name: name.into(),
            version,
            kind,
            dependencies: BTreeMap::new(),
            compile: Vec::new(),
            runtime: Vec::new(),
            native: Vec::new(),
            build: Vec::new(),
            build_cross_targeting: Vec::new(),
            framework: None,
        }
    }

    pub fn key(&self) -> String {
        library_key(&self.name, &self.version)
    }
}

/// Flattened libraries for one framework, optionally one runtime, listed
/// dependency-first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub framework: TargetFramework,
    pub runtime_identifier: Option<String>,
    pub libraries: Vec<TargetLibrary>,
}

impl ResolvedTarget {
    /// `net45` or `net45/win7-x86`.
    pub fn name(&self) -> String {
        match &self.runtime_identifier {
            Some(rid) => format!("{}/{rid}", self.framework.short_folder_name()),
            None => self.framework.short_folder_name(),
        }
    }

    pub fn library(&self, name: &str) -> Option<&TargetLibrary> {
        self.libraries
            .iter()
            .find(|library| library.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedGraph {
    pub targets: Vec<ResolvedTarget>,
    pub libraries: BTreeMap<String, LibraryRecord>,
    /// Direct requests per framework short name, as `id range`.
    pub project_dependencies: BTreeMap<String, Vec<String>>,
    pub package_folders: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

impl ResolvedGraph {
    pub fn target(&self, framework: &TargetFramework, runtime_identifier: Option<&str>) -> Option<&ResolvedTarget> {
        self.targets.iter().find(|target| {
            &target.framework == framework && target.runtime_identifier.as_deref() == runtime_identifier
        })
    }
}
