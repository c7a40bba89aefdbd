use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use packrestore_cache::{GlobalPackagesFolder, MachineCache};
use packrestore_core::PackageId;
use packrestore_feeds::{PackageSource, PushClient, PushOutcome, SourceProtocol, SourceStore};
use tracing::info;

use crate::config::Settings;
use crate::session::Session;

/// Which local store `locals clear` empties.
#[derive(Copy, Clone, Debug, Eq, PartialEq, clap::ValueEnum)]
pub(crate) enum LocalsTarget {
    All,
    HttpCache,
    GlobalPackages,
}

/// `--source` names a configured source or is used as a location as-is.
pub(crate) fn select_push_source(available: &[PackageSource], requested: &str) -> PackageSource {
    available
        .iter()
        .find(|source| source.name.eq_ignore_ascii_case(requested))
        .cloned()
        .unwrap_or_else(|| PackageSource::new(requested, requested))
}

pub(crate) fn run_push(
    session: &Session,
    package: &Path,
    source: &PackageSource,
    api_key: Option<&str>,
    skip_duplicate: bool,
) -> Result<PushOutcome> {
    let bytes = fs::read(package).with_context(|| format!("failed reading package: {}", package.display()))?;
    let client = PushClient::new(session.http.clone());
    client.push(source, &bytes, api_key, skip_duplicate)
}

pub(crate) fn format_push_outcome(outcome: PushOutcome, package: &Path, source: &PackageSource) -> String {
    let file = package
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| package.display().to_string());
    match outcome {
        PushOutcome::Created => format!("pushed {file} to {}", source.name),
        PushOutcome::AlreadyExists => format!("{file} already exists at {}, skipped", source.name),
    }
}

/// `id version` lines: every version, or the latest one only.
pub(crate) fn run_list(session: &Session, id: &str, prerelease: bool, all_versions: bool) -> Result<Vec<String>> {
    let id = PackageId::parse(id)?;
    let aggregator = session.fetcher.aggregator();
    if all_versions {
        let Some((versions, source)) = aggregator.list_versions(&id)? else {
            return Ok(Vec::new());
        };
        info!(id = %id, source = %source, versions = versions.len(), "listed versions");
        return Ok(versions
            .iter()
            .filter(|version| prerelease || !version.is_prerelease())
            .map(|version| format!("{id} {version}"))
            .collect());
    }
    Ok(aggregator
        .find_latest(&id, prerelease)?
        .map(|(version, _)| vec![format!("{id} {version}")])
        .unwrap_or_default())
}

pub(crate) fn add_source(store: &SourceStore, name: &str, location: &str, protocol: Option<SourceProtocol>) -> Result<()> {
    let mut source = PackageSource::new(name, location);
    if let Some(protocol) = protocol {
        source = source.with_protocol(protocol);
    }
    store.add_source(source)
}

pub(crate) fn format_source_lines(sources: &[PackageSource]) -> Vec<String> {
    sources
        .iter()
        .enumerate()
        .map(|(index, source)| {
            let state = if source.enabled { "enabled" } else { "disabled" };
            format!(
                "{}. {} [{}, {}] {}",
                index + 1,
                source.name,
                source.resolved_protocol().as_str(),
                state,
                source.location
            )
        })
        .collect()
}

/// Clears the selected local stores and names each one cleared.
pub(crate) fn clear_locals(settings: &Settings, target: LocalsTarget) -> Result<Vec<String>> {
    let mut cleared = Vec::new();
    if matches!(target, LocalsTarget::All | LocalsTarget::HttpCache) {
        let cache = MachineCache::new(&settings.machine_cache_folder, settings.machine_cache_ttl);
        cache.clear()?;
        cleared.push(format!("http-cache: {}", cache.root().display()));
    }
    if matches!(target, LocalsTarget::All | LocalsTarget::GlobalPackages) {
        let global = GlobalPackagesFolder::new(&settings.global_packages_folder);
        global.clear()?;
        cleared.push(format!("global-packages: {}", global.root().display()));
    }
    Ok(cleared)
}
