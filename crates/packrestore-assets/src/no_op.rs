use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use packrestore_resolver::RestoreRequest;
use packrestore_security::sha256_hex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::outputs::{write_if_changed, ProjectOutputs};

const CACHE_FILE_VERSION: u32 = 1;

/// `{project}.packrestore.cache`: the inputs of the last successful
/// restore and the package files it relied on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreCacheFile {
    pub version: u32,
    pub inputs_hash: String,
    pub success: bool,
    #[serde(default)]
    pub expected_package_files: Vec<String>,
}

/// Hash of everything that can change a project's restore result: the
/// request itself plus caller supplied context such as sources and folders.
pub fn restore_inputs_hash(request: &RestoreRequest, context: &[String]) -> String {
    let mut lines = Vec::new();
    for rid in &request.runtime_identifiers {
        lines.push(format!("runtime {rid}"));
    }
    for framework in &request.frameworks {
        lines.push(format!("framework {}", framework.framework.short_folder_name()));
        for fallback in &framework.fallbacks {
            lines.push(format!("  fallback {}", fallback.short_folder_name()));
        }
        for dependency in &framework.dependencies {
            lines.push(format!("  dependency {} {}", dependency.id, dependency.constraint));
        }
        for project in &framework.projects {
            lines.push(format!("  project {} {}", project.name, project.path));
            for dependency in &project.dependencies {
                lines.push(format!("    dependency {} {}", dependency.id, dependency.constraint));
            }
            for reference in &project.references {
                lines.push(format!("    reference {reference}"));
            }
        }
    }
    for entry in context {
        lines.push(format!("context {entry}"));
    }
    sha256_hex(lines.join("\n").as_bytes())
}

/// True when the last restore succeeded with the same inputs and everything
/// it produced or installed is still on disk.
pub fn is_no_op(outputs: &ProjectOutputs, inputs_hash: &str) -> bool {
    let Ok(content) = fs::read_to_string(outputs.cache_path()) else {
        return false;
    };
    let Ok(cache) = serde_json::from_str::<RestoreCacheFile>(&content) else {
        debug!(path = %outputs.cache_path().display(), "ignoring unreadable restore cache file");
        return false;
    };
    cache.version == CACHE_FILE_VERSION
        && cache.success
        && cache.inputs_hash == inputs_hash
        && outputs.assets_path.is_file()
        && outputs.props_path().is_file()
        && outputs.targets_path().is_file()
        && cache
            .expected_package_files
            .iter()
            .all(|path| Path::new(path).is_file())
}

pub fn record_restore(outputs: &ProjectOutputs, inputs_hash: &str, expected_package_files: Vec<String>) -> Result<()> {
    let cache = RestoreCacheFile {
        version: CACHE_FILE_VERSION,
        inputs_hash: inputs_hash.to_string(),
        success: true,
        expected_package_files,
    };
    let mut content = serde_json::to_string_pretty(&cache).context("failed serializing restore cache file")?;
    content.push('\n');
    write_if_changed(&outputs.cache_path(), content.as_bytes())?;
    Ok(())
}
