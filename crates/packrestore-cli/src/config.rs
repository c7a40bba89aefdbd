use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use packrestore_cache::DEFAULT_MACHINE_CACHE_TTL;
use packrestore_core::DependencyBehavior;
use packrestore_feeds::{HttpSettings, PackageSource, SourceProtocol};
use serde::Deserialize;

pub(crate) const CONFIG_FILE_NAME: &str = "packrestore.toml";
pub(crate) const DEFAULT_SOURCE_NAME: &str = "nuget.org";
pub(crate) const DEFAULT_SOURCE_LOCATION: &str = "https://api.nuget.org/v3/index.json";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 100;
const DEFAULT_CREDENTIAL_TIMEOUT_SECS: u64 = 300;

pub(crate) const ENV_CONFIG_HOME: &str = "PACKRESTORE_CONFIG_HOME";
pub(crate) const ENV_PACKAGES: &str = "PACKRESTORE_PACKAGES";
pub(crate) const ENV_FALLBACK_PACKAGES: &str = "PACKRESTORE_FALLBACK_PACKAGES";
pub(crate) const ENV_HTTP_CACHE: &str = "PACKRESTORE_HTTP_CACHE";

/// `packrestore.toml` as written by the user; every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct ConfigFile {
    pub global_packages_folder: Option<PathBuf>,
    pub fallback_package_folders: Vec<PathBuf>,
    pub machine_cache_folder: Option<PathBuf>,
    pub machine_cache_ttl_secs: Option<u64>,
    pub dependency_version: Option<String>,
    pub disable_parallel: bool,
    pub p2p_timeout_secs: Option<u64>,
    pub http: HttpConfig,
    pub sources: Vec<PackageSource>,
    pub credential_providers: Vec<CredentialProviderConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct HttpConfig {
    pub timeout_secs: Option<u64>,
    pub max_tries: Option<u32>,
    pub max_redirects: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CredentialProviderConfig {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl CredentialProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_CREDENTIAL_TIMEOUT_SECS))
    }
}

/// Effective settings: file values with environment overrides applied and
/// defaults filled in. Command-line flags are layered on by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Settings {
    pub config_home: PathBuf,
    pub global_packages_folder: PathBuf,
    pub fallback_package_folders: Vec<PathBuf>,
    pub machine_cache_folder: PathBuf,
    pub machine_cache_ttl: Duration,
    pub dependency_behavior: DependencyBehavior,
    pub disable_parallel: bool,
    pub p2p_timeout: Option<Duration>,
    pub http_timeout: Duration,
    pub http: HttpSettings,
    /// Sources from the config file; persisted `sources.toml` entries are
    /// merged in by the caller.
    pub sources: Vec<PackageSource>,
    pub credential_providers: Vec<CredentialProviderConfig>,
}

impl Settings {
    /// Loads `--config` or `{config_home}/packrestore.toml`. A missing file
    /// yields the defaults.
    pub fn load(explicit: Option<&Path>, env: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let config_home = config_home(env)?;
        let path = explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| config_home.join(CONFIG_FILE_NAME));

        let file = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed reading config: {}", path.display()))?;
            parse_config(&content).with_context(|| format!("invalid config: {}", path.display()))?
        } else if explicit.is_some() {
            anyhow::bail!("config file does not exist: {}", path.display());
        } else {
            ConfigFile::default()
        };

        Self::resolve(file, config_home, env)
    }

    pub fn resolve(file: ConfigFile, config_home: PathBuf, env: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let global_packages_folder = non_empty(env(ENV_PACKAGES))
            .map(PathBuf::from)
            .or(file.global_packages_folder)
            .unwrap_or_else(|| config_home.join("packages"));

        let fallback_package_folders = match non_empty(env(ENV_FALLBACK_PACKAGES)) {
            Some(value) => value
                .split(';')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(PathBuf::from)
                .collect(),
            None => file.fallback_package_folders,
        };

        let machine_cache_folder = non_empty(env(ENV_HTTP_CACHE))
            .map(PathBuf::from)
            .or(file.machine_cache_folder)
            .unwrap_or_else(|| config_home.join("http-cache"));

        let dependency_behavior = match file.dependency_version.as_deref() {
            Some(value) => DependencyBehavior::parse(value)?,
            None => DependencyBehavior::Lowest,
        };

        let defaults = HttpSettings::default();
        let http = HttpSettings {
            max_tries: file.http.max_tries.unwrap_or(defaults.max_tries).max(1),
            max_redirects: file.http.max_redirects.unwrap_or(defaults.max_redirects),
            retry_delay: defaults.retry_delay,
        };

        Ok(Self {
            global_packages_folder,
            fallback_package_folders,
            machine_cache_folder,
            machine_cache_ttl: file
                .machine_cache_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_MACHINE_CACHE_TTL),
            dependency_behavior,
            disable_parallel: file.disable_parallel,
            p2p_timeout: file.p2p_timeout_secs.map(Duration::from_secs),
            http_timeout: Duration::from_secs(file.http.timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS)),
            http,
            sources: file.sources,
            credential_providers: file.credential_providers,
            config_home,
        })
    }

    /// File sources, then persisted ones not already named, else the
    /// public default. Disabled sources are kept.
    pub fn merged_sources(&self, persisted: &[PackageSource]) -> Vec<PackageSource> {
        let mut sources = self.sources.clone();
        for source in persisted {
            if !sources
                .iter()
                .any(|existing| existing.name.eq_ignore_ascii_case(&source.name))
            {
                sources.push(source.clone());
            }
        }
        if sources.is_empty() {
            sources.push(
                PackageSource::new(DEFAULT_SOURCE_NAME, DEFAULT_SOURCE_LOCATION)
                    .with_protocol(SourceProtocol::V3),
            );
        }
        sources
    }

    pub fn effective_sources(&self, persisted: &[PackageSource]) -> Vec<PackageSource> {
        let mut sources = self.merged_sources(persisted);
        sources.retain(|source| source.enabled);
        sources
    }
}

pub(crate) fn parse_config(content: &str) -> Result<ConfigFile> {
    toml::from_str(content).context("failed parsing toml")
}

/// `$PACKRESTORE_CONFIG_HOME`, else `~/.packrestore`.
pub(crate) fn config_home(env: &dyn Fn(&str) -> Option<String>) -> Result<PathBuf> {
    if let Some(home) = non_empty(env(ENV_CONFIG_HOME)) {
        return Ok(PathBuf::from(home));
    }
    let home = non_empty(env("HOME"))
        .or_else(|| non_empty(env("USERPROFILE")))
        .context("HOME is not set; cannot resolve the packrestore config home")?;
    Ok(PathBuf::from(home).join(".packrestore"))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}
