use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use packrestore_core::TargetFramework;
use packrestore_resolver::{LibraryKind, ResolvedGraph, ResolvedTarget, TargetLibrary};
use tracing::debug;

pub(crate) const EXCLUDE_CONDITION: &str = "'$(ExcludeRestorePackageImports)' != 'true'";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    Props,
    Targets,
}

impl ImportKind {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Props => "props",
            Self::Targets => "targets",
        }
    }
}

/// Imports sharing one MSBuild condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportGroup {
    /// `None` for the cross-targeting group.
    pub framework: Option<TargetFramework>,
    pub condition: String,
    /// Absolute paths, dependencies before their dependents.
    pub imports: Vec<PathBuf>,
}

/// Import groups for one kind of MSBuild file.
///
/// A project with several frameworks gets a cross-targeting group first,
/// then one group per framework. Empty groups are left out.
pub fn import_groups(graph: &ResolvedGraph, kind: ImportKind) -> Result<Vec<ImportGroup>> {
    let targets = graph
        .targets
        .iter()
        .filter(|target| target.runtime_identifier.is_none())
        .collect::<Vec<_>>();
    let cross_targeting = targets.len() > 1;
    let mut groups = Vec::new();

    if cross_targeting {
        let mut imports = Vec::new();
        for target in &targets {
            collect_imports(graph, target, kind, AssetFolder::BuildCrossTargeting, &mut imports)?;
        }
        if !imports.is_empty() {
            groups.push(ImportGroup {
                framework: None,
                condition: format!(" '$(TargetFramework)' == '' AND {EXCLUDE_CONDITION} "),
                imports,
            });
        }
    }

    for target in &targets {
        let mut imports = Vec::new();
        collect_imports(graph, target, kind, AssetFolder::Build, &mut imports)?;
        if imports.is_empty() {
            continue;
        }
        let condition = if cross_targeting {
            format!(
                " '$(TargetFramework)' == '{}' AND {EXCLUDE_CONDITION} ",
                target.framework.short_folder_name()
            )
        } else {
            format!(" {EXCLUDE_CONDITION} ")
        };
        groups.push(ImportGroup {
            framework: Some(target.framework.clone()),
            condition,
            imports,
        });
    }
    Ok(groups)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssetFolder {
    Build,
    BuildCrossTargeting,
}

impl AssetFolder {
    fn name(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::BuildCrossTargeting => "buildCrossTargeting",
        }
    }

    fn max_depth(self) -> usize {
        match self {
            // build/{file} or build/{framework}/{file}
            Self::Build => 3,
            Self::BuildCrossTargeting => 2,
        }
    }
}

fn collect_imports(
    graph: &ResolvedGraph,
    target: &ResolvedTarget,
    kind: ImportKind,
    folder: AssetFolder,
    imports: &mut Vec<PathBuf>,
) -> Result<()> {
    for library in target
        .libraries
        .iter()
        .filter(|library| library.kind == LibraryKind::Package)
    {
        let files = match folder {
            AssetFolder::Build => &library.build,
            AssetFolder::BuildCrossTargeting => &library.build_cross_targeting,
        };
        for file in files {
            if !is_eligible(library, file, kind, folder)? {
                continue;
            }
            let path = package_directory(graph, library)?.join(file);
            if !imports.contains(&path) {
                imports.push(path);
            }
        }
    }
    Ok(())
}

/// Only `{folder}/{id}.{ext}` and `{folder}/{framework}/{id}.{ext}` are
/// imported; anything else in the package is ignored.
fn is_eligible(library: &TargetLibrary, file: &str, kind: ImportKind, folder: AssetFolder) -> Result<bool> {
    let segments = file.split(['/', '\\']).collect::<Vec<_>>();
    if segments
        .iter()
        .any(|segment| *segment == ".." || *segment == ".")
        || file.starts_with('/')
    {
        bail!(
            "package '{} {}' asset '{file}' points outside the package folder",
            library.name,
            library.version
        );
    }
    if segments.len() < 2
        || segments.len() > folder.max_depth()
        || !segments[0].eq_ignore_ascii_case(folder.name())
    {
        return Ok(false);
    }

    let file_name = segments[segments.len() - 1];
    let Some((stem, extension)) = file_name.rsplit_once('.') else {
        return Ok(false);
    };
    if !extension.eq_ignore_ascii_case(kind.extension()) {
        return Ok(false);
    }
    if !stem.eq_ignore_ascii_case(&library.name) {
        debug!(package = %library.name, file, "skipping build asset not named after its package");
        return Ok(false);
    }
    Ok(true)
}

/// Folder the package was installed into: the first package folder that
/// holds it, else the global folder.
fn package_directory(graph: &ResolvedGraph, library: &TargetLibrary) -> Result<PathBuf> {
    let record = graph
        .libraries
        .get(&library.key())
        .ok_or_else(|| anyhow!("library '{}' has no library record", library.key()))?;
    let first = graph
        .package_folders
        .first()
        .ok_or_else(|| anyhow!("resolved graph lists no package folders"))?;
    let relative = Path::new(&record.path);
    let root = graph
        .package_folders
        .iter()
        .find(|folder| folder.join(relative).is_dir())
        .unwrap_or(first);
    Ok(root.join(relative))
}
