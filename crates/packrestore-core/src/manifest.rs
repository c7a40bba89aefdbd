use anyhow::{anyhow, Context};

use crate::framework::TargetFramework;
use crate::identity::{validate_package_id, PackageId, PackageIdentity};
use crate::range::VersionConstraint;
use crate::version::PackageVersion;
use crate::xml::XmlElement;

const NUSPEC_NAMESPACE: &str = "http://schemas.microsoft.com/packaging/2013/05/nuspec.xsd";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDependency {
    pub id: PackageId,
    pub constraint: VersionConstraint,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl PackageDependency {
    pub fn new(id: impl Into<PackageId>, constraint: VersionConstraint) -> Self {
        Self {
            id: id.into(),
            constraint,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

/// Dependencies declared for one framework; `None` applies to any framework.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGroup {
    pub target_framework: Option<TargetFramework>,
    pub dependencies: Vec<PackageDependency>,
}

/// Metadata read from a package's `.nuspec`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageManifest {
    pub id: PackageId,
    pub version: PackageVersion,
    pub min_client_version: Option<PackageVersion>,
    pub description: Option<String>,
    pub authors: Option<String>,
    pub development_dependency: bool,
    pub dependency_groups: Vec<DependencyGroup>,
}

impl PackageManifest {
    pub fn new(id: impl Into<PackageId>, version: PackageVersion) -> Self {
        Self {
            id: id.into(),
            version,
            min_client_version: None,
            description: None,
            authors: None,
            development_dependency: false,
            dependency_groups: Vec::new(),
        }
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let root = XmlElement::parse(content).context("failed to parse nuspec")?;
        if !root.name.eq_ignore_ascii_case("package") {
            return Err(anyhow!("invalid nuspec: root element is <{}>", root.name));
        }
        let metadata = root
            .child("metadata")
            .ok_or_else(|| anyhow!("invalid nuspec: missing <metadata>"))?;

        let id = metadata
            .child_text("id")
            .ok_or_else(|| anyhow!("invalid nuspec: missing <id>"))?;
        validate_package_id(id)?;
        let version = metadata
            .child_text("version")
            .ok_or_else(|| anyhow!("invalid nuspec: missing <version>"))
            .and_then(PackageVersion::parse)
            .with_context(|| format!("invalid nuspec for package '{id}'"))?;
        let min_client_version = metadata
            .attr("minClientVersion")
            .map(PackageVersion::parse)
            .transpose()
            .with_context(|| format!("invalid minClientVersion in nuspec for package '{id}'"))?;

        let mut dependency_groups = Vec::new();
        if let Some(dependencies) = metadata.child("dependencies") {
            let flat = dependencies
                .children_named("dependency")
                .map(parse_dependency)
                .collect::<anyhow::Result<Vec<_>>>()
                .with_context(|| format!("invalid dependencies in nuspec for package '{id}'"))?;
            if !flat.is_empty() {
                dependency_groups.push(DependencyGroup {
                    target_framework: None,
                    dependencies: flat,
                });
            }
            for group in dependencies.children_named("group") {
                let target_framework = group
                    .attr("targetFramework")
                    .filter(|value| !value.trim().is_empty())
                    .map(TargetFramework::parse)
                    .transpose()
                    .with_context(|| format!("invalid dependency group in nuspec for package '{id}'"))?;
                let dependencies = group
                    .children_named("dependency")
                    .map(parse_dependency)
                    .collect::<anyhow::Result<Vec<_>>>()
                    .with_context(|| format!("invalid dependencies in nuspec for package '{id}'"))?;
                dependency_groups.push(DependencyGroup {
                    target_framework,
                    dependencies,
                });
            }
        }

        Ok(Self {
            id: PackageId::new(id),
            version,
            min_client_version,
            description: metadata.child_text("description").map(str::to_string),
            authors: metadata.child_text("authors").map(str::to_string),
            development_dependency: metadata
                .child_text("developmentDependency")
                .is_some_and(|value| value.eq_ignore_ascii_case("true")),
            dependency_groups,
        })
    }

    pub fn identity(&self) -> PackageIdentity {
        PackageIdentity::new(self.id.clone(), self.version.clone())
    }

    /// Dependencies of the group nearest to `framework`, trying each
    /// fallback framework when nothing is compatible. Packages without
    /// any groups have no dependencies.
    pub fn dependencies_for(
        &self,
        framework: &TargetFramework,
        fallbacks: &[TargetFramework],
    ) -> &[PackageDependency] {
        let frameworks = self
            .dependency_groups
            .iter()
            .map(|group| group.target_framework.clone().unwrap_or_else(TargetFramework::any))
            .collect::<Vec<_>>();
        let Some(nearest) = framework.get_nearest_with_fallback(fallbacks, &frameworks) else {
            return &[];
        };
        frameworks
            .iter()
            .position(|candidate| candidate == nearest)
            .map(|index| self.dependency_groups[index].dependencies.as_slice())
            .unwrap_or_default()
    }

    pub fn to_nuspec_xml(&self) -> anyhow::Result<String> {
        let mut metadata = XmlElement::new("metadata");
        if let Some(min_client_version) = &self.min_client_version {
            metadata = metadata.with_attribute("minClientVersion", min_client_version.to_string());
        }
        metadata = metadata
            .with_child(XmlElement::new("id").with_text(self.id.as_str()))
            .with_child(XmlElement::new("version").with_text(self.version.to_string()));
        if let Some(authors) = &self.authors {
            metadata = metadata.with_child(XmlElement::new("authors").with_text(authors.as_str()));
        }
        if let Some(description) = &self.description {
            metadata =
                metadata.with_child(XmlElement::new("description").with_text(description.as_str()));
        }
        if self.development_dependency {
            metadata = metadata.with_child(XmlElement::new("developmentDependency").with_text("true"));
        }

        if !self.dependency_groups.is_empty() {
            let mut dependencies = XmlElement::new("dependencies");
            for group in &self.dependency_groups {
                let mut element = XmlElement::new("group");
                if let Some(framework) = &group.target_framework {
                    element = element.with_attribute("targetFramework", framework.short_folder_name());
                }
                for dependency in &group.dependencies {
                    let mut child = XmlElement::new("dependency")
                        .with_attribute("id", dependency.id.as_str())
                        .with_attribute("version", dependency.constraint.to_string());
                    if !dependency.include.is_empty() {
                        child = child.with_attribute("include", dependency.include.join(","));
                    }
                    if !dependency.exclude.is_empty() {
                        child = child.with_attribute("exclude", dependency.exclude.join(","));
                    }
                    element = element.with_child(child);
                }
                dependencies = dependencies.with_child(element);
            }
            metadata = metadata.with_child(dependencies);
        }

        XmlElement::new("package")
            .with_attribute("xmlns", NUSPEC_NAMESPACE)
            .with_child(metadata)
            .to_document()
    }
}

fn parse_dependency(element: &XmlElement) -> anyhow::Result<PackageDependency> {
    let id = element
        .attr("id")
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| anyhow!("dependency is missing an id"))?;
    let constraint = match element.attr("version") {
        Some(raw) => VersionConstraint::parse(raw)
            .with_context(|| format!("invalid version for dependency '{id}'"))?,
        None => VersionConstraint::any(),
    };
    Ok(PackageDependency {
        id: PackageId::new(id),
        constraint,
        include: split_list(element.attr("include")),
        exclude: split_list(element.attr("exclude")),
    })
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}
