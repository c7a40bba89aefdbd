use std::path::Path;

use anyhow::Result;
use packrestore_core::client_compatibility_version;
use packrestore_core::xml::XmlElement;
use packrestore_resolver::ResolvedGraph;
use tracing::debug;

use crate::imports::{import_groups, ImportGroup, ImportKind, EXCLUDE_CONDITION};
use crate::outputs::{write_if_changed, ProjectOutputs};

const MSBUILD_NAMESPACE: &str = "http://schemas.microsoft.com/developer/msbuild/2003";

/// The `.nuget.g.props` document: restore properties, then props imports.
pub fn render_props(graph: &ResolvedGraph, outputs: &ProjectOutputs) -> Result<String> {
    let package_root = graph
        .package_folders
        .first()
        .map(|folder| with_trailing_separator(folder))
        .unwrap_or_default();
    let package_folders = graph
        .package_folders
        .iter()
        .map(|folder| folder.display().to_string())
        .collect::<Vec<_>>()
        .join(";");

    let properties = XmlElement::new("PropertyGroup")
        .with_attribute("Condition", format!(" {EXCLUDE_CONDITION} "))
        .with_child(property("RestoreSuccess", "True"))
        .with_child(property("RestoreTool", "packrestore"))
        .with_child(property(
            "ProjectAssetsFile",
            &outputs.assets_path.display().to_string(),
        ))
        .with_child(property("NuGetPackageRoot", &package_root))
        .with_child(property("NuGetPackageFolders", &package_folders))
        .with_child(property("NuGetProjectStyle", &outputs.project_style))
        .with_child(property(
            "NuGetToolVersion",
            &client_compatibility_version().to_string(),
        ));

    let mut project = project_element().with_child(properties);
    for group in import_groups(graph, ImportKind::Props)? {
        project = project.with_child(import_group(&group));
    }
    project.to_document()
}

/// The `.nuget.g.targets` document: targets imports only.
pub fn render_targets(graph: &ResolvedGraph) -> Result<String> {
    let mut project = project_element();
    for group in import_groups(graph, ImportKind::Targets)? {
        project = project.with_child(import_group(&group));
    }
    project.to_document()
}

/// Writes both import files; unchanged files are left untouched.
pub fn write_msbuild_files(graph: &ResolvedGraph, outputs: &ProjectOutputs) -> Result<()> {
    let props_path = outputs.props_path();
    let props = render_props(graph, outputs)?;
    if write_if_changed(&props_path, props.as_bytes())? {
        debug!(path = %props_path.display(), "wrote msbuild props");
    }

    let targets_path = outputs.targets_path();
    let targets = render_targets(graph)?;
    if write_if_changed(&targets_path, targets.as_bytes())? {
        debug!(path = %targets_path.display(), "wrote msbuild targets");
    }
    Ok(())
}

fn project_element() -> XmlElement {
    XmlElement::new("Project")
        .with_attribute("ToolsVersion", "14.0")
        .with_attribute("xmlns", MSBUILD_NAMESPACE)
}

fn property(name: &str, value: &str) -> XmlElement {
    XmlElement::new(name).with_text(value)
}

fn import_group(group: &ImportGroup) -> XmlElement {
    let mut element = XmlElement::new("ImportGroup").with_attribute("Condition", group.condition.clone());
    for import in &group.imports {
        let path = import.display().to_string();
        element = element.with_child(
            XmlElement::new("Import")
                .with_attribute("Project", path.clone())
                .with_attribute("Condition", format!("Exists('{path}')")),
        );
    }
    element
}

fn with_trailing_separator(folder: &Path) -> String {
    let mut out = folder.display().to_string();
    if !out.ends_with(std::path::MAIN_SEPARATOR) {
        out.push(std::path::MAIN_SEPARATOR);
    }
    out
}
