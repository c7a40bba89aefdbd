use std::path::{Path, PathBuf};

use packrestore_core::{PackageId, PackageVersion, TargetFramework};

/// `{global}/.tools/{id}/{version}/{framework}/project.assets.json`, shared
/// by every project referencing the same tool version.
pub fn tool_assets_path(
    global_root: &Path,
    id: &PackageId,
    version: &PackageVersion,
    framework: &TargetFramework,
) -> PathBuf {
    global_root
        .join(".tools")
        .join(id.to_lower())
        .join(version.to_normalized_string().to_ascii_lowercase())
        .join(framework.short_folder_name())
        .join("project.assets.json")
}
