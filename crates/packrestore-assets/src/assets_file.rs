use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use packrestore_core::RestoreError;
use packrestore_resolver::{LibraryKind, ResolvedGraph, TargetLibrary};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::outputs::{write_if_changed, AssetsFormat, ProjectOutputs};

pub const ASSETS_FILE_VERSION: u32 = 3;
pub const LOCK_FILE_VERSION: u32 = 2;

/// Serializes as `{}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// `project.assets.json` / `project.lock.json`. Maps are ordered so the
/// rendered file depends only on the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    pub version: u32,
    pub targets: BTreeMap<String, BTreeMap<String, TargetEntry>>,
    pub libraries: BTreeMap<String, LibraryEntry>,
    pub project_file_dependency_groups: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub package_folders: BTreeMap<String, Empty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectSection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetEntry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub compile: BTreeMap<String, Empty>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub runtime: BTreeMap<String, Empty>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub native: BTreeMap<String, Empty>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub build: BTreeMap<String, Empty>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub build_cross_targeting: BTreeMap<String, Empty>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha512: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msbuild_project: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSection {
    pub version: String,
    pub restore: RestoreSection,
    pub frameworks: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runtimes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSection {
    pub project_name: String,
    pub project_path: String,
    pub project_style: String,
    pub output_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub level: String,
    pub message: String,
}

impl AssetsFile {
    /// The file restore writes for a project, in the project's format.
    pub fn for_project(graph: &ResolvedGraph, outputs: &ProjectOutputs) -> Self {
        match outputs.format {
            AssetsFormat::Assets => {
                let mut file = Self::from_graph(graph, ASSETS_FILE_VERSION);
                file.package_folders = graph
                    .package_folders
                    .iter()
                    .map(|folder| (folder.display().to_string(), Empty {}))
                    .collect();
                file.project = Some(project_section(graph, outputs));
                file
            }
            AssetsFormat::Lock => {
                let mut file = Self::from_graph(graph, LOCK_FILE_VERSION);
                file.locked = Some(false);
                file
            }
        }
    }

    /// Tool restores record the graph without a project section.
    pub fn for_tool(graph: &ResolvedGraph) -> Self {
        let mut file = Self::from_graph(graph, ASSETS_FILE_VERSION);
        file.package_folders = graph
            .package_folders
            .iter()
            .map(|folder| (folder.display().to_string(), Empty {}))
            .collect();
        file
    }

    fn from_graph(graph: &ResolvedGraph, version: u32) -> Self {
        let mut file = Self {
            version,
            ..Self::default()
        };

        for target in &graph.targets {
            let name = match &target.runtime_identifier {
                Some(rid) => format!("{}/{rid}", target.framework.full_name()),
                None => target.framework.full_name(),
            };
            let entries = target
                .libraries
                .iter()
                .map(|library| (library.key(), target_entry(library)))
                .collect();
            file.targets.insert(name, entries);

            if target.runtime_identifier.is_none() {
                let direct = graph
                    .project_dependencies
                    .get(&target.framework.short_folder_name())
                    .cloned()
                    .unwrap_or_default();
                file.project_file_dependency_groups
                    .insert(target.framework.full_name(), direct);
            }
        }
        file.project_file_dependency_groups
            .entry(String::new())
            .or_default();

        for (key, record) in &graph.libraries {
            let entry = match record.kind {
                LibraryKind::Package => LibraryEntry {
                    sha512: record.sha512.clone(),
                    kind: record.kind.as_str().to_string(),
                    path: record.path.clone(),
                    msbuild_project: None,
                    files: record.files.clone(),
                },
                LibraryKind::Project => LibraryEntry {
                    sha512: None,
                    kind: record.kind.as_str().to_string(),
                    path: record.path.clone(),
                    msbuild_project: Some(record.path.clone()),
                    files: Vec::new(),
                },
            };
            file.libraries.insert(key.clone(), entry);
        }

        file.logs = graph
            .warnings
            .iter()
            .map(|message| LogEntry {
                level: "Warning".to_string(),
                message: message.clone(),
            })
            .collect();
        file
    }

    pub fn to_json(&self) -> Result<String> {
        let mut out = serde_json::to_string_pretty(self).context("failed serializing assets file")?;
        out.push('\n');
        Ok(out)
    }

    /// Reads an existing file. A missing file is `None`; so is a corrupt
    /// one, which the next write regenerates.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed reading assets file: {}", path.display()))
            }
        };
        match serde_json::from_str(&content) {
            Ok(file) => Ok(Some(file)),
            Err(err) => {
                let corrupted = RestoreError::CorruptedCacheEntry {
                    path: path.to_path_buf(),
                    message: err.to_string(),
                };
                warn!("{corrupted}; it will be regenerated");
                Ok(None)
            }
        }
    }

    /// Returns whether the file on disk changed.
    pub fn write(&self, path: &Path) -> Result<bool> {
        write_if_changed(path, self.to_json()?.as_bytes())
    }
}

fn target_entry(library: &TargetLibrary) -> TargetEntry {
    let files = |paths: &[String]| {
        paths
            .iter()
            .map(|path| (path.clone(), Empty {}))
            .collect::<BTreeMap<_, _>>()
    };
    TargetEntry {
        kind: library.kind.as_str().to_string(),
        framework: library.framework.clone(),
        dependencies: library.dependencies.clone(),
        compile: files(&library.compile),
        runtime: files(&library.runtime),
        native: files(&library.native),
        build: files(&library.build),
        build_cross_targeting: files(&library.build_cross_targeting),
    }
}

fn project_section(graph: &ResolvedGraph, outputs: &ProjectOutputs) -> ProjectSection {
    let mut frameworks = Vec::new();
    let mut runtimes = Vec::new();
    for target in &graph.targets {
        let framework = target.framework.short_folder_name();
        if !frameworks.contains(&framework) {
            frameworks.push(framework);
        }
        if let Some(rid) = &target.runtime_identifier {
            if !runtimes.contains(rid) {
                runtimes.push(rid.clone());
            }
        }
    }
    ProjectSection {
        version: "1.0.0".to_string(),
        restore: RestoreSection {
            project_name: outputs.project_name.clone(),
            project_path: outputs.project_path.display().to_string(),
            project_style: outputs.project_style.clone(),
            output_path: outputs.output_dir.display().to_string(),
        },
        frameworks,
        runtimes,
    }
}
