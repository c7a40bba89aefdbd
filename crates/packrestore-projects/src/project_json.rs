use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use packrestore_core::{TargetFramework, VersionConstraint};
use serde_json::{Map, Value};

use crate::types::{PackageReference, ProjectFramework};

/// What a `project.json` contributes to its project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectJson {
    pub dependencies: Vec<PackageReference>,
    pub frameworks: Vec<ProjectFramework>,
    pub runtime_identifiers: Vec<String>,
    pub tools: Vec<PackageReference>,
}

pub fn read_project_json(path: &Path) -> Result<ProjectJson> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed reading project.json: {}", path.display()))?;
    parse_project_json(&content).with_context(|| format!("invalid project.json: {}", path.display()))
}

pub fn parse_project_json(content: &str) -> Result<ProjectJson> {
    let root: Value = serde_json::from_str(content).context("failed parsing json")?;
    let root = root
        .as_object()
        .ok_or_else(|| anyhow!("project.json must be a json object"))?;

    let mut out = ProjectJson {
        dependencies: read_dependencies(root.get("dependencies"))?,
        tools: read_dependencies(root.get("tools"))?,
        ..ProjectJson::default()
    };

    if let Some(frameworks) = root.get("frameworks") {
        let frameworks = frameworks
            .as_object()
            .ok_or_else(|| anyhow!("'frameworks' must be an object"))?;
        for (name, body) in frameworks {
            let framework = TargetFramework::parse(name)
                .with_context(|| format!("invalid framework '{name}'"))?;
            let mut entry = ProjectFramework::new(framework);
            entry.dependencies = read_dependencies(body.get("dependencies"))?;
            entry.fallbacks = read_imports(body.get("imports"))
                .with_context(|| format!("invalid imports for framework '{name}'"))?;
            out.frameworks.push(entry);
        }
    }
    if out.frameworks.is_empty() {
        bail!("project.json declares no frameworks");
    }

    if let Some(runtimes) = root.get("runtimes") {
        let runtimes = runtimes
            .as_object()
            .ok_or_else(|| anyhow!("'runtimes' must be an object"))?;
        out.runtime_identifiers = runtimes.keys().cloned().collect();
    }
    Ok(out)
}

fn read_dependencies(value: Option<&Value>) -> Result<Vec<PackageReference>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let map = value
        .as_object()
        .ok_or_else(|| anyhow!("dependencies must be an object"))?;

    let mut out = Vec::new();
    for (id, spec) in map {
        out.push(read_dependency(id, spec).with_context(|| format!("invalid dependency '{id}'"))?);
    }
    Ok(out)
}

fn read_dependency(id: &str, spec: &Value) -> Result<PackageReference> {
    match spec {
        Value::String(range) => Ok(PackageReference::new(id, VersionConstraint::parse(range)?)),
        Value::Object(fields) => {
            let constraint = match fields.get("version").and_then(Value::as_str) {
                Some(range) => VersionConstraint::parse(range)?,
                None => VersionConstraint::any(),
            };
            let mut reference = PackageReference::new(id, constraint);
            reference.private_assets = is_private(fields);
            Ok(reference)
        }
        _ => bail!("expected a version string or an object"),
    }
}

fn is_private(fields: &Map<String, Value>) -> bool {
    let suppress_all = fields
        .get("suppressParent")
        .and_then(Value::as_str)
        .is_some_and(|value| value.eq_ignore_ascii_case("all"));
    let build_only = fields
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|value| value.eq_ignore_ascii_case("build"));
    suppress_all || build_only
}

fn read_imports(value: Option<&Value>) -> Result<Vec<TargetFramework>> {
    match value {
        None => Ok(Vec::new()),
        Some(Value::String(single)) => Ok(vec![TargetFramework::parse(single)?]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                let name = item
                    .as_str()
                    .ok_or_else(|| anyhow!("imports must be framework names"))?;
                TargetFramework::parse(name)
            })
            .collect(),
        Some(_) => bail!("imports must be a string or an array"),
    }
}
