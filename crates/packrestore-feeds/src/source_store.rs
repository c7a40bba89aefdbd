use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::source_state::{
    parse_source_state_file, validate_source_location, validate_source_name, SourceStateFile,
};
use crate::PackageSource;

/// Persisted source list (`sources.toml`), kept in declared order.
#[derive(Debug, Clone)]
pub struct SourceStore {
    state_root: PathBuf,
}

impl SourceStore {
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
        }
    }

    pub fn add_source(&self, source: PackageSource) -> Result<()> {
        validate_source_name(&source.name)?;
        validate_source_location(&source.location)?;

        let mut state = self.load_state()?;
        if state
            .sources
            .iter()
            .any(|existing| existing.name.eq_ignore_ascii_case(&source.name))
        {
            anyhow::bail!("source '{}' already exists", source.name);
        }

        state.sources.push(source);
        self.save_state(&state)
    }

    pub fn list_sources(&self) -> Result<Vec<PackageSource>> {
        Ok(self.load_state()?.sources)
    }

    pub fn remove_source(&self, name: &str) -> Result<()> {
        let mut state = self.load_state()?;
        let before = state.sources.len();
        state
            .sources
            .retain(|source| !source.name.eq_ignore_ascii_case(name));
        if state.sources.len() == before {
            anyhow::bail!("source '{}' not found", name);
        }

        self.save_state(&state)
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut state = self.load_state()?;
        let Some(source) = state
            .sources
            .iter_mut()
            .find(|source| source.name.eq_ignore_ascii_case(name))
        else {
            anyhow::bail!("source '{}' not found", name);
        };
        source.enabled = enabled;
        self.save_state(&state)
    }

    fn sources_file_path(&self) -> PathBuf {
        self.state_root.join("sources.toml")
    }

    fn load_state(&self) -> Result<SourceStateFile> {
        let path = self.sources_file_path();
        if !path.exists() {
            return Ok(SourceStateFile::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed reading source state: {}", path.display()))?;
        parse_source_state_file(&content)
            .with_context(|| format!("failed parsing source state: {}", path.display()))
    }

    fn save_state(&self, state: &SourceStateFile) -> Result<()> {
        fs::create_dir_all(&self.state_root).with_context(|| {
            format!(
                "failed creating source state root: {}",
                self.state_root.display()
            )
        })?;

        let path = self.sources_file_path();
        let content = toml::to_string(state)
            .with_context(|| format!("failed serializing source state: {}", path.display()))?;
        fs::write(&path, content)
            .with_context(|| format!("failed writing source state: {}", path.display()))
    }
}
