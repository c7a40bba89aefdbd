use std::collections::HashSet;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::PackageSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SourceStateFile {
    #[serde(default = "state_file_version")]
    pub(crate) version: u32,
    #[serde(default)]
    pub(crate) sources: Vec<PackageSource>,
}

impl Default for SourceStateFile {
    fn default() -> Self {
        Self {
            version: state_file_version(),
            sources: Vec::new(),
        }
    }
}

pub(crate) fn parse_source_state_file(content: &str) -> Result<SourceStateFile> {
    let state = toml::from_str::<SourceStateFile>(content).context("failed parsing source state")?;
    let expected = state_file_version();
    if state.version != expected {
        anyhow::bail!(
            "unsupported source state version {} (expected {}): update sources.toml to version {}",
            state.version,
            expected,
            expected
        );
    }

    validate_loaded_sources(&state.sources)?;
    Ok(state)
}

pub(crate) fn state_file_version() -> u32 {
    1
}

pub fn validate_source_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 {
        anyhow::bail!("invalid source name: must be 1 to 64 characters");
    }

    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        anyhow::bail!("invalid source name: '{name}'");
    };

    let first_is_valid = first.is_ascii_alphanumeric();
    let rest_is_valid =
        chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.');
    if !first_is_valid || !rest_is_valid {
        anyhow::bail!("invalid source name: '{name}'");
    }

    Ok(())
}

pub(crate) fn validate_source_location(location: &str) -> Result<()> {
    if location.trim().is_empty() {
        anyhow::bail!("invalid source location: must not be empty");
    }
    let lower = location.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        url::Url::parse(location)
            .with_context(|| format!("invalid source location: '{location}'"))?;
    }
    Ok(())
}

pub(crate) fn validate_loaded_sources(sources: &[PackageSource]) -> Result<()> {
    let mut seen_names: HashSet<String> = HashSet::with_capacity(sources.len());
    for source in sources {
        validate_source_name(&source.name)?;
        validate_source_location(&source.location)?;

        if !seen_names.insert(source.name.to_ascii_lowercase()) {
            anyhow::bail!(
                "duplicate source name '{}' in sources.toml: remove or rename one entry",
                source.name
            );
        }
    }

    Ok(())
}
