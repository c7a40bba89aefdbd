use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use packrestore_core::xml::XmlElement;
use packrestore_core::{PackageIdentity, PackageVersion, TargetFramework, VersionConstraint};

use crate::types::PackagesConfigEntry;

pub fn read_packages_config(path: &Path) -> Result<Vec<PackagesConfigEntry>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed reading packages config: {}", path.display()))?;
    parse_packages_config(&content)
        .with_context(|| format!("invalid packages config: {}", path.display()))
}

pub fn parse_packages_config(content: &str) -> Result<Vec<PackagesConfigEntry>> {
    let root = XmlElement::parse(content)?;
    if !root.name.eq_ignore_ascii_case("packages") {
        bail!("expected a <packages> root element, found <{}>", root.name);
    }

    let mut entries = Vec::new();
    for package in root.children_named("package") {
        let id = package
            .attr("id")
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow!("package entry is missing an 'id'"))?;
        let version = package
            .attr("version")
            .ok_or_else(|| anyhow!("package '{id}' is missing a 'version'"))?;
        let version = PackageVersion::parse(version)
            .with_context(|| format!("package '{id}' has an invalid version"))?;
        let target_framework = package
            .attr("targetFramework")
            .filter(|value| !value.trim().is_empty())
            .map(TargetFramework::parse)
            .transpose()
            .with_context(|| format!("package '{id}' has an invalid targetFramework"))?;
        let allowed_versions = package
            .attr("allowedVersions")
            .filter(|value| !value.trim().is_empty())
            .map(VersionConstraint::parse)
            .transpose()
            .with_context(|| format!("package '{id}' has invalid allowedVersions"))?;
        let development_dependency = package
            .attr("developmentDependency")
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"));

        entries.push(PackagesConfigEntry {
            identity: PackageIdentity::new(id, version),
            target_framework,
            development_dependency,
            allowed_versions,
        });
    }
    Ok(entries)
}

/// `packages.{project}.config` wins over `packages.config` next to the
/// project file.
pub fn find_packages_config(project_dir: &Path, project_name: &str) -> Option<PathBuf> {
    let named = project_dir.join(format!("packages.{project_name}.config"));
    if named.is_file() {
        return Some(named);
    }
    let plain = project_dir.join("packages.config");
    plain.is_file().then_some(plain)
}

/// Solution-level legacy packages file, `{solution_dir}/.nuget/packages.config`.
pub fn solution_packages_config(solution_dir: &Path) -> Option<PathBuf> {
    let path = solution_dir.join(".nuget").join("packages.config");
    path.is_file().then_some(path)
}
