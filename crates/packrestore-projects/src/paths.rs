use std::path::{Component, Path, PathBuf};

/// Resolves `.` and `..` without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolves an include path written in a project file (which may use `\`)
/// against the including file's directory.
pub fn resolve_include(base_dir: &Path, include: &str) -> PathBuf {
    let portable = include.trim().replace('\\', "/");
    normalize_path(&base_dir.join(portable))
}

/// `/`-separated path from `from_dir` to `to`.
pub fn relative_path(from_dir: &Path, to: &Path) -> String {
    let from = normalize_path(from_dir);
    let to = normalize_path(to);
    let from_parts = from.components().collect::<Vec<_>>();
    let to_parts = to.components().collect::<Vec<_>>();
    let shared = from_parts
        .iter()
        .zip(&to_parts)
        .take_while(|(left, right)| left == right)
        .count();

    let mut parts = Vec::new();
    for _ in shared..from_parts.len() {
        parts.push("..".to_string());
    }
    for component in &to_parts[shared..] {
        parts.push(component.as_os_str().to_string_lossy().into_owned());
    }
    parts.join("/")
}
