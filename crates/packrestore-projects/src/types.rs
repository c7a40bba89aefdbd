use std::path::{Path, PathBuf};

use packrestore_core::{PackageIdentity, TargetFramework, VersionConstraint};

/// How a project declares its packages, decided once when it is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProjectStyle {
    PackageReference,
    PackagesConfig,
    ProjectJson,
    /// No package markers at all. Walked for its references, never restored.
    Unknown,
}

impl ProjectStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PackageReference => "PackageReference",
            Self::PackagesConfig => "PackagesConfig",
            Self::ProjectJson => "ProjectJson",
            Self::Unknown => "Unknown",
        }
    }

    /// Styles restored through the graph resolver and an assets file.
    pub fn uses_assets_file(self) -> bool {
        matches!(self, Self::PackageReference | Self::ProjectJson)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReference {
    pub id: String,
    pub constraint: VersionConstraint,
    /// `PrivateAssets="all"` or `suppressParent: all`; the reference does
    /// not flow to projects referencing this one.
    pub private_assets: bool,
}

impl PackageReference {
    pub fn new(id: impl Into<String>, constraint: VersionConstraint) -> Self {
        Self {
            id: id.into(),
            constraint,
            private_assets: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectReference {
    /// Absolute, lexically normalized.
    pub path: PathBuf,
    /// False for `ReferenceOutputAssembly=false`.
    pub flows: bool,
}

/// One target framework of a project and what applies only to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectFramework {
    pub framework: TargetFramework,
    pub fallbacks: Vec<TargetFramework>,
    pub dependencies: Vec<PackageReference>,
}

impl ProjectFramework {
    pub fn new(framework: TargetFramework) -> Self {
        Self {
            framework,
            fallbacks: Vec::new(),
            dependencies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagesConfigEntry {
    pub identity: PackageIdentity,
    pub target_framework: Option<TargetFramework>,
    pub development_dependency: bool,
    pub allowed_versions: Option<VersionConstraint>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectNode {
    pub path: PathBuf,
    pub name: String,
    pub style: ProjectStyle,
    pub frameworks: Vec<ProjectFramework>,
    /// References that apply to every framework.
    pub dependencies: Vec<PackageReference>,
    pub references: Vec<ProjectReference>,
    pub runtime_identifiers: Vec<String>,
    /// `DotNetCliToolReference` items.
    pub tools: Vec<PackageReference>,
    pub packages_config: Vec<PackagesConfigEntry>,
    /// The packages.config or project.json the style was read from.
    pub package_spec_path: Option<PathBuf>,
}

impl ProjectNode {
    pub fn new(path: impl Into<PathBuf>, style: ProjectStyle) -> Self {
        let path = path.into();
        let name = project_name(&path);
        Self {
            path,
            name,
            style,
            frameworks: Vec::new(),
            dependencies: Vec::new(),
            references: Vec::new(),
            runtime_identifiers: Vec::new(),
            tools: Vec::new(),
            packages_config: Vec::new(),
            package_spec_path: None,
        }
    }

    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn framework(&self, framework: &TargetFramework) -> Option<&ProjectFramework> {
        self.frameworks
            .iter()
            .find(|candidate| &candidate.framework == framework)
    }

    /// References that apply under `framework`: the shared ones followed by
    /// the framework's own.
    pub fn dependencies_for(&self, framework: &TargetFramework) -> Vec<&PackageReference> {
        let mut out = self.dependencies.iter().collect::<Vec<_>>();
        if let Some(specific) = self.framework(framework) {
            out.extend(specific.dependencies.iter());
        }
        out
    }
}

/// File stem of a project path, `App` for `src/App/App.csproj`.
pub fn project_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}
