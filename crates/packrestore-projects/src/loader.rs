use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use packrestore_core::xml::XmlElement;
use packrestore_core::{TargetFramework, VersionConstraint};
use tracing::debug;

use crate::packages_config::{find_packages_config, read_packages_config};
use crate::paths::resolve_include;
use crate::project_json::read_project_json;
use crate::types::{
    project_name, PackageReference, ProjectFramework, ProjectNode, ProjectReference, ProjectStyle,
};

/// Turns a project file into a [`ProjectNode`]. The walker only talks to
/// projects through this seam.
pub trait ProjectLoader: Sync {
    fn load(&self, path: &Path) -> Result<ProjectNode>;

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// Reads MSBuild project XML directly: unconditional properties, items and
/// item groups conditioned on a single `$(TargetFramework)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsBuildProjectLoader;

impl ProjectLoader for MsBuildProjectLoader {
    fn load(&self, path: &Path) -> Result<ProjectNode> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed reading project file: {}", path.display()))?;
        let root = XmlElement::parse(&content)
            .with_context(|| format!("invalid project file: {}", path.display()))?;
        if !root.name.eq_ignore_ascii_case("Project") {
            bail!(
                "invalid project file: {}: expected a <Project> root element",
                path.display()
            );
        }
        let evaluated = evaluate(path, &root)?;
        build_node(path, evaluated)
    }
}

#[derive(Debug, Default)]
struct EvaluatedProject {
    properties: BTreeMap<String, String>,
    package_references: Vec<PackageReference>,
    conditioned_references: Vec<(String, PackageReference)>,
    project_references: Vec<ProjectReference>,
    tools: Vec<PackageReference>,
}

impl EvaluatedProject {
    fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    fn list_property(&self, name: &str) -> Vec<String> {
        self.property(name).map(split_list).unwrap_or_default()
    }
}

fn evaluate(path: &Path, root: &XmlElement) -> Result<EvaluatedProject> {
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let mut project = EvaluatedProject::default();

    for group in root.children_named("PropertyGroup") {
        if group.attr("Condition").is_some() {
            continue;
        }
        for property in &group.children {
            project
                .properties
                .insert(property.name.to_ascii_lowercase(), property.text.trim().to_string());
        }
    }

    for group in root.children_named("ItemGroup") {
        let framework = match group.attr("Condition") {
            None => None,
            Some(condition) => match condition_framework(condition) {
                Some(framework) => Some(framework.to_string()),
                None => {
                    debug!(project = %path.display(), condition, "skipping conditioned item group");
                    continue;
                }
            },
        };

        for item in &group.children {
            let Some(include) = item.attr("Include").map(str::trim).filter(|value| !value.is_empty())
            else {
                continue;
            };
            match item.name.as_str() {
                "PackageReference" => {
                    let reference = package_reference(include, item)?;
                    match &framework {
                        Some(framework) => project
                            .conditioned_references
                            .push((framework.clone(), reference)),
                        None => project.package_references.push(reference),
                    }
                }
                "ProjectReference" => project.project_references.push(ProjectReference {
                    path: resolve_include(base, include),
                    flows: !metadata(item, "ReferenceOutputAssembly")
                        .is_some_and(|value| value.eq_ignore_ascii_case("false")),
                }),
                "DotNetCliToolReference" => project.tools.push(package_reference(include, item)?),
                _ => {}
            }
        }
    }
    Ok(project)
}

fn build_node(path: &Path, project: EvaluatedProject) -> Result<ProjectNode> {
    let name = project_name(path);
    let directory = path.parent().unwrap_or_else(|| Path::new("."));
    let project_json = project_json_path(directory, &name);
    let packages_config = find_packages_config(directory, &name);

    let declared = project.property("RestoreProjectStyle").map(str::to_ascii_lowercase);
    let style = match declared.as_deref() {
        Some("packagereference") => ProjectStyle::PackageReference,
        Some("projectjson") => ProjectStyle::ProjectJson,
        Some("packagesconfig") => ProjectStyle::PackagesConfig,
        _ if !project.package_references.is_empty()
            || project.property("TargetFramework").is_some()
            || project.property("TargetFrameworks").is_some() =>
        {
            ProjectStyle::PackageReference
        }
        _ if project_json.is_some() => ProjectStyle::ProjectJson,
        _ if packages_config.is_some() => ProjectStyle::PackagesConfig,
        _ => ProjectStyle::Unknown,
    };

    let mut node = ProjectNode::new(path, style);
    node.references = project.project_references.clone();

    match style {
        ProjectStyle::PackageReference => {
            node.frameworks = msbuild_frameworks(&project)?;
            if node.frameworks.is_empty() {
                bail!("project declares no target framework");
            }
            for (condition, reference) in &project.conditioned_references {
                let framework = TargetFramework::parse(condition)
                    .with_context(|| format!("invalid framework in condition '{condition}'"))?;
                if let Some(entry) = node
                    .frameworks
                    .iter_mut()
                    .find(|entry| entry.framework == framework)
                {
                    entry.dependencies.push(reference.clone());
                }
            }
            node.runtime_identifiers = runtime_identifiers(&project);
            node.dependencies = project.package_references;
            node.tools = project.tools;
        }
        ProjectStyle::ProjectJson => {
            let json_path = project_json.ok_or_else(|| {
                anyhow!("project uses project.json restore but has no project.json")
            })?;
            let json = read_project_json(&json_path)?;
            node.dependencies = json.dependencies;
            node.frameworks = json.frameworks;
            node.runtime_identifiers = json.runtime_identifiers;
            node.tools = json.tools;
            node.package_spec_path = Some(json_path);
        }
        ProjectStyle::PackagesConfig => {
            node.frameworks = msbuild_frameworks(&project)?;
            if let Some(config_path) = packages_config {
                node.packages_config = read_packages_config(&config_path)?;
                node.package_spec_path = Some(config_path);
            }
        }
        ProjectStyle::Unknown => {
            node.frameworks = msbuild_frameworks(&project).unwrap_or_default();
        }
    }
    Ok(node)
}

fn msbuild_frameworks(project: &EvaluatedProject) -> Result<Vec<ProjectFramework>> {
    let mut names = project.list_property("TargetFrameworks");
    if names.is_empty() {
        if let Some(single) = project.property("TargetFramework") {
            names.push(single.to_string());
        } else if let Some(version) = project.property("TargetFrameworkVersion") {
            let identifier = project
                .property("TargetFrameworkIdentifier")
                .unwrap_or(".NETFramework");
            names.push(format!("{identifier},Version={version}"));
        }
    }

    let mut fallbacks = Vec::new();
    for name in project
        .list_property("PackageTargetFallback")
        .into_iter()
        .chain(project.list_property("AssetTargetFallback"))
    {
        let framework = TargetFramework::parse(&name)
            .with_context(|| format!("invalid fallback framework '{name}'"))?;
        if !fallbacks.contains(&framework) {
            fallbacks.push(framework);
        }
    }

    let mut out: Vec<ProjectFramework> = Vec::new();
    for name in names {
        let framework = TargetFramework::parse(&name)
            .with_context(|| format!("invalid target framework '{name}'"))?;
        if out.iter().any(|entry| entry.framework == framework) {
            continue;
        }
        let mut entry = ProjectFramework::new(framework);
        entry.fallbacks = fallbacks.clone();
        out.push(entry);
    }
    Ok(out)
}

fn runtime_identifiers(project: &EvaluatedProject) -> Vec<String> {
    let mut out = project.list_property("RuntimeIdentifiers");
    if let Some(single) = project.property("RuntimeIdentifier") {
        out.push(single.to_string());
    }
    let mut seen = Vec::<String>::new();
    out.retain(|rid| {
        let fresh = !seen.iter().any(|existing| existing.eq_ignore_ascii_case(rid));
        if fresh {
            seen.push(rid.clone());
        }
        fresh
    });
    out
}

fn package_reference(include: &str, item: &XmlElement) -> Result<PackageReference> {
    let constraint = match metadata(item, "Version") {
        Some(range) => VersionConstraint::parse(range)
            .with_context(|| format!("package reference '{include}' has an invalid version"))?,
        None => {
            debug!(package = include, "package reference has no version; using the lowest available");
            VersionConstraint::any()
        }
    };
    let mut reference = PackageReference::new(include, constraint);
    reference.private_assets = metadata(item, "PrivateAssets")
        .is_some_and(|value| split_list(value).iter().any(|asset| asset.eq_ignore_ascii_case("all")));
    Ok(reference)
}

/// Item metadata, written either as an attribute or a child element.
fn metadata<'a>(item: &'a XmlElement, name: &str) -> Option<&'a str> {
    item.attr(name)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| item.child_text(name))
}

/// `'$(TargetFramework)' == 'net45'` yields `net45`.
fn condition_framework(condition: &str) -> Option<&str> {
    let (left, right) = condition.split_once("==")?;
    if left.trim().trim_matches('\'').trim() != "$(TargetFramework)" {
        return None;
    }
    let value = right.trim().trim_matches('\'').trim();
    (!value.is_empty()).then_some(value)
}

/// `;`-separated MSBuild list, dropping `$(Property)` self-references.
fn split_list(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty() && !part.starts_with("$("))
        .map(str::to_string)
        .collect()
}

fn project_json_path(directory: &Path, name: &str) -> Option<PathBuf> {
    let named = directory.join(format!("{name}.project.json"));
    if named.is_file() {
        return Some(named);
    }
    let plain = directory.join("project.json");
    plain.is_file().then_some(plain)
}
