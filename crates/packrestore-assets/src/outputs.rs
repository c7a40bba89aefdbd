use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetsFormat {
    /// `obj/project.assets.json`.
    Assets,
    /// `project.lock.json` next to a project.json.
    Lock,
}

/// Where restore writes a project's generated files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectOutputs {
    pub project_name: String,
    pub project_path: PathBuf,
    /// `PackageReference` or `ProjectJson`, recorded in the generated files.
    pub project_style: String,
    pub output_dir: PathBuf,
    pub assets_path: PathBuf,
    pub format: AssetsFormat,
}

impl ProjectOutputs {
    pub fn package_reference(project_path: &Path) -> Self {
        let output_dir = project_dir(project_path).join("obj");
        Self {
            project_name: stem(project_path),
            project_path: project_path.to_path_buf(),
            project_style: "PackageReference".to_string(),
            assets_path: output_dir.join("project.assets.json"),
            output_dir,
            format: AssetsFormat::Assets,
        }
    }

    pub fn project_json(project_path: &Path) -> Self {
        let directory = project_dir(project_path);
        Self {
            project_name: stem(project_path),
            project_path: project_path.to_path_buf(),
            project_style: "ProjectJson".to_string(),
            assets_path: directory.join("project.lock.json"),
            output_dir: directory.join("obj"),
            format: AssetsFormat::Lock,
        }
    }

    pub fn props_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.nuget.g.props", self.project_name))
    }

    pub fn targets_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.nuget.g.targets", self.project_name))
    }

    pub fn cache_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.packrestore.cache", self.project_name))
    }
}

fn project_dir(project_path: &Path) -> PathBuf {
    project_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn stem(project_path: &Path) -> String {
    project_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Writes `content` unless the file already holds exactly these bytes.
/// Returns whether the file changed.
pub fn write_if_changed(path: &Path, content: &[u8]) -> Result<bool> {
    if fs::read(path).is_ok_and(|existing| existing == content) {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output dir: {}", parent.display()))?;
    }

    let part_path = path.with_file_name(format!(
        "{}.part",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("output")
    ));
    if let Err(err) = fs::write(&part_path, content) {
        let _ = fs::remove_file(&part_path);
        return Err(err).with_context(|| format!("failed to write file: {}", part_path.display()));
    }
    fs::rename(&part_path, path)
        .with_context(|| format!("failed to move file into place: {}", path.display()))?;
    Ok(true)
}
