use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::paths::resolve_include;

const SOLUTION_FOLDER_TYPE: &str = "2150E333-8FDC-42A3-9474-1A3956D46DE8";

/// Project files listed in a `.sln`, in declaration order. Solution folders
/// are skipped.
pub fn read_solution(path: &Path) -> Result<Vec<PathBuf>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed reading solution: {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(parse_solution(&content)
        .into_iter()
        .map(|include| resolve_include(base, &include))
        .collect())
}

/// Raw project paths from `Project("{type}") = "Name", "path", "{guid}"`
/// lines.
pub fn parse_solution(content: &str) -> Vec<String> {
    let mut out = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("Project(") else {
            continue;
        };
        let Some((kind, fields)) = rest.split_once(")") else {
            continue;
        };
        if kind
            .trim_matches(|ch| ch == '"' || ch == '{' || ch == '}')
            .eq_ignore_ascii_case(SOLUTION_FOLDER_TYPE)
        {
            continue;
        }
        let Some((_, fields)) = fields.split_once('=') else {
            continue;
        };
        let values = fields
            .split(',')
            .map(|field| field.trim().trim_matches('"').to_string())
            .collect::<Vec<_>>();
        if let Some(path) = values.get(1).filter(|path| !path.is_empty()) {
            out.push(path.clone());
        }
    }
    out
}
