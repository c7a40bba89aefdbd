use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use packrestore_core::{
    find_restore_error, DependencyBehavior, PackageId, PackageIdentity, PackageVersion,
    RestoreError, VersionConstraint,
};
use tracing::{debug, warn};

use crate::feed::FeedClient;

/// Where a request was satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRemote {
    pub identity: PackageIdentity,
    pub source_index: usize,
    pub source_name: String,
}

type VersionSlot = Arc<Mutex<Option<Arc<Vec<PackageVersion>>>>>;

/// Ordered feeds queried first-match-wins. Version listings are memoized per
/// (source, id) for the session and concurrent lookups of the same pair
/// share one request.
pub struct SourceAggregator {
    clients: Vec<Arc<dyn FeedClient>>,
    behavior: DependencyBehavior,
    versions: Mutex<HashMap<(usize, PackageId), VersionSlot>>,
}

impl SourceAggregator {
    pub fn new(clients: Vec<Arc<dyn FeedClient>>) -> Self {
        Self {
            clients,
            behavior: DependencyBehavior::default(),
            versions: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_behavior(mut self, behavior: DependencyBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn behavior(&self) -> DependencyBehavior {
        self.behavior
    }

    pub fn clients(&self) -> &[Arc<dyn FeedClient>] {
        &self.clients
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Version list of `id` on one source, memoized.
    pub fn versions_on(&self, source_index: usize, id: &PackageId) -> Result<Arc<Vec<PackageVersion>>> {
        let client = self
            .clients
            .get(source_index)
            .ok_or_else(|| anyhow!("no source at position {source_index}"))?;
        let slot = {
            let mut versions = self
                .versions
                .lock()
                .map_err(|_| anyhow!("version cache lock poisoned"))?;
            Arc::clone(versions.entry((source_index, id.clone())).or_default())
        };

        let mut slot = slot
            .lock()
            .map_err(|_| anyhow!("version cache lock poisoned"))?;
        if let Some(listed) = slot.as_ref() {
            return Ok(Arc::clone(listed));
        }
        let listed = Arc::new(client.list_versions(id)?);
        *slot = Some(Arc::clone(&listed));
        Ok(listed)
    }

    /// Walks the sources in order; the first with a version satisfying
    /// `constraint` decides. Unreachable sources only fail the lookup when no
    /// later source answers.
    pub fn resolve(
        &self,
        id: &PackageId,
        constraint: &VersionConstraint,
    ) -> Result<Option<ResolvedRemote>> {
        let mut deferred: Option<anyhow::Error> = None;
        for (index, client) in self.clients.iter().enumerate() {
            let versions = match self.versions_on(index, id) {
                Ok(versions) => versions,
                Err(err) if is_source_local(&err) => {
                    warn!(source = %client.source().name, id = %id, error = %format!("{err:#}"), "source failed, trying next");
                    deferred.get_or_insert(err);
                    continue;
                }
                Err(err) => return Err(err),
            };
            if let Some(version) = constraint.find_best_match(versions.iter(), self.behavior) {
                debug!(source = %client.source().name, id = %id, version = %version, "resolved");
                return Ok(Some(ResolvedRemote {
                    identity: PackageIdentity::new(id.clone(), version.clone()),
                    source_index: index,
                    source_name: client.source().name.clone(),
                }));
            }
        }

        match deferred {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    /// Downloads `identity`, starting with `preferred` and falling through on
    /// 404 or source-local failures.
    pub fn fetch(&self, identity: &PackageIdentity, preferred: Option<usize>) -> Result<Vec<u8>> {
        let mut order = Vec::with_capacity(self.clients.len());
        if let Some(preferred) = preferred.filter(|index| *index < self.clients.len()) {
            order.push(preferred);
        }
        order.extend((0..self.clients.len()).filter(|index| Some(*index) != preferred));

        let mut deferred: Option<anyhow::Error> = None;
        for index in order {
            let client = &self.clients[index];
            match client.fetch(identity) {
                Ok(Some(bytes)) => {
                    debug!(source = %client.source().name, package = %identity, bytes = bytes.len(), "fetched");
                    return Ok(bytes);
                }
                Ok(None) => continue,
                Err(err) if is_source_local(&err) => {
                    warn!(source = %client.source().name, package = %identity, error = %format!("{err:#}"), "fetch failed, trying next source");
                    deferred.get_or_insert(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(deferred.unwrap_or_else(|| {
            RestoreError::VersionNotFound {
                id: identity.id.to_string(),
                requested: identity.version.to_string(),
            }
            .into()
        }))
    }

    /// Latest version on the first source that knows `id`.
    pub fn find_latest(
        &self,
        id: &PackageId,
        include_prerelease: bool,
    ) -> Result<Option<(PackageVersion, String)>> {
        let mut deferred: Option<anyhow::Error> = None;
        for (index, client) in self.clients.iter().enumerate() {
            match self.versions_on(index, id) {
                Ok(versions) => {
                    let latest = versions
                        .iter()
                        .filter(|version| include_prerelease || !version.is_prerelease())
                        .max();
                    if let Some(latest) = latest {
                        return Ok(Some((latest.clone(), client.source().name.clone())));
                    }
                }
                Err(err) if is_source_local(&err) => {
                    deferred.get_or_insert(err);
                }
                Err(err) => return Err(err),
            }
        }
        match deferred {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    /// All versions from the first source that has any.
    pub fn list_versions(&self, id: &PackageId) -> Result<Option<(Vec<PackageVersion>, String)>> {
        let mut deferred: Option<anyhow::Error> = None;
        for (index, client) in self.clients.iter().enumerate() {
            match self.versions_on(index, id) {
                Ok(versions) if !versions.is_empty() => {
                    return Ok(Some((versions.as_ref().clone(), client.source().name.clone())));
                }
                Ok(_) => {}
                Err(err) if is_source_local(&err) => {
                    deferred.get_or_insert(err);
                }
                Err(err) => return Err(err),
            }
        }
        match deferred {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }
}

fn is_source_local(err: &anyhow::Error) -> bool {
    find_restore_error(err).is_some_and(RestoreError::is_source_local)
}
