use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use packrestore_core::xml::XmlElement;
use packrestore_core::{
    DependencyGroup, PackageDependency, PackageId, PackageIdentity, PackageVersion,
    RestoreError, TargetFramework, VersionConstraint,
};
use tracing::{debug, warn};

use crate::feed::FeedClient;
use crate::http::HttpSource;
use crate::PackageSource;

const MAX_FEED_PAGES: usize = 1000;

/// One `<entry>` of an OData package feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V2PackageEntry {
    pub identity: PackageIdentity,
    pub download_url: String,
    pub dependency_groups: Vec<DependencyGroup>,
    pub min_client_version: Option<PackageVersion>,
}

/// Client for OData (Atom XML) feeds.
pub struct V2FeedClient {
    source: PackageSource,
    http: Arc<HttpSource>,
    by_id: Mutex<HashMap<PackageId, Arc<Vec<V2PackageEntry>>>>,
}

impl V2FeedClient {
    pub fn new(source: PackageSource, http: Arc<HttpSource>) -> Self {
        Self {
            source,
            http,
            by_id: Mutex::new(HashMap::new()),
        }
    }

    fn base(&self) -> &str {
        self.source.location.trim_end_matches('/')
    }

    /// `FindPackagesById()`, following `next` links. Results are kept for the
    /// session so a later fetch reuses the download urls.
    pub fn find_packages_by_id(&self, id: &PackageId) -> Result<Arc<Vec<V2PackageEntry>>> {
        let mut by_id = self
            .by_id
            .lock()
            .map_err(|_| anyhow!("feed cache lock poisoned"))?;
        if let Some(entries) = by_id.get(id) {
            return Ok(Arc::clone(entries));
        }

        let mut entries = Vec::new();
        let mut next = Some(format!("{}/FindPackagesById()?id='{}'", self.base(), id));
        let mut pages = 0;
        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_FEED_PAGES {
                return Err(RestoreError::Protocol {
                    url,
                    message: format!("feed paging exceeded {MAX_FEED_PAGES} pages"),
                }
                .into());
            }
            let Some(body) = self.http.get_text(&url)? else {
                break;
            };
            let (page, next_link) = parse_feed(&body).map_err(|err| RestoreError::Protocol {
                url: url.clone(),
                message: format!("{err:#}"),
            })?;
            entries.extend(
                page.into_iter()
                    .filter(|entry| entry.identity.id == *id),
            );
            next = next_link;
        }
        debug!(source = %self.source.name, id = %id, count = entries.len(), "listed packages");

        let entries = Arc::new(entries);
        by_id.insert(id.clone(), Arc::clone(&entries));
        Ok(entries)
    }

    /// `Packages(Id='..',Version='..')`.
    pub fn package_entry(&self, identity: &PackageIdentity) -> Result<Option<V2PackageEntry>> {
        let url = format!(
            "{}/Packages(Id='{}',Version='{}')",
            self.base(),
            identity.id,
            identity.version
        );
        let Some(body) = self.http.get_text(&url)? else {
            return Ok(None);
        };
        let (entries, _) = parse_feed(&body).map_err(|err| RestoreError::Protocol {
            url: url.clone(),
            message: format!("{err:#}"),
        })?;
        Ok(entries.into_iter().next())
    }

    fn cached_entry(&self, identity: &PackageIdentity) -> Option<V2PackageEntry> {
        let by_id = self.by_id.lock().ok()?;
        by_id
            .get(&identity.id)?
            .iter()
            .find(|entry| entry.identity.version == identity.version)
            .cloned()
    }
}

impl FeedClient for V2FeedClient {
    fn source(&self) -> &PackageSource {
        &self.source
    }

    fn list_versions(&self, id: &PackageId) -> Result<Vec<PackageVersion>> {
        let mut versions = self
            .find_packages_by_id(id)?
            .iter()
            .map(|entry| entry.identity.version.clone())
            .collect::<Vec<_>>();
        versions.sort();
        versions.dedup();
        Ok(versions)
    }

    fn fetch(&self, identity: &PackageIdentity) -> Result<Option<Vec<u8>>> {
        let entry = match self.cached_entry(identity) {
            Some(entry) => Some(entry),
            None => self.package_entry(identity)?,
        };
        let url = match entry {
            Some(entry) => entry.download_url,
            None => format!("{}/package/{}/{}", self.base(), identity.id, identity.version),
        };
        self.http.get_bytes(&url)
    }
}

/// Parses an Atom feed or a single entry; returns the entries and the `next`
/// link, if any.
pub fn parse_feed(content: &str) -> Result<(Vec<V2PackageEntry>, Option<String>)> {
    let root = XmlElement::parse(content).context("invalid feed document")?;
    let entries = if root.name == "entry" {
        vec![parse_entry(&root)?]
    } else if root.name == "feed" {
        root.children_named("entry")
            .map(parse_entry)
            .collect::<Result<Vec<_>>>()?
    } else {
        return Err(anyhow!("unexpected feed root element <{}>", root.name));
    };

    let next = root
        .children_named("link")
        .find(|link| link.attr("rel") == Some("next"))
        .and_then(|link| link.attr("href"))
        .map(str::to_string);
    Ok((entries, next))
}

fn parse_entry(entry: &XmlElement) -> Result<V2PackageEntry> {
    let properties = entry
        .child("properties")
        .ok_or_else(|| anyhow!("feed entry has no properties"))?;
    let id = properties
        .child_text("Id")
        .or_else(|| entry.child_text("title"))
        .ok_or_else(|| anyhow!("feed entry has no package id"))?;
    let version = properties
        .child_text("NormalizedVersion")
        .or_else(|| properties.child_text("Version"))
        .ok_or_else(|| anyhow!("feed entry for '{id}' has no version"))
        .and_then(PackageVersion::parse)?;
    let download_url = entry
        .child("content")
        .and_then(|content| content.attr("src"))
        .map(str::to_string)
        .ok_or_else(|| anyhow!("feed entry for '{id} {version}' has no download url"))?;
    let min_client_version = match properties.child_text("MinClientVersion") {
        Some(raw) => Some(
            PackageVersion::parse(raw)
                .with_context(|| format!("invalid MinClientVersion for '{id} {version}'"))?,
        ),
        None => None,
    };
    let dependency_groups = properties
        .child_text("Dependencies")
        .map(parse_dependencies)
        .unwrap_or_default();

    Ok(V2PackageEntry {
        identity: PackageIdentity::new(id, version),
        download_url,
        dependency_groups,
        min_client_version,
    })
}

/// `id:range:framework|id:range:framework`; an empty framework applies to
/// every framework.
pub fn parse_dependencies(raw: &str) -> Vec<DependencyGroup> {
    let mut groups: Vec<DependencyGroup> = Vec::new();
    for item in raw.split('|').map(str::trim).filter(|item| !item.is_empty()) {
        let mut parts = item.splitn(3, ':');
        let id = parts.next().unwrap_or_default().trim();
        let range = parts.next().unwrap_or_default().trim();
        let framework = parts.next().unwrap_or_default().trim();

        let target_framework = if framework.is_empty() {
            None
        } else {
            match TargetFramework::parse(framework) {
                Ok(parsed) => Some(parsed),
                Err(err) => {
                    warn!(framework, error = %err, "skipping dependency with unknown framework");
                    continue;
                }
            }
        };
        let group = match groups
            .iter_mut()
            .position(|group| group.target_framework == target_framework)
        {
            Some(index) => &mut groups[index],
            None => {
                groups.push(DependencyGroup {
                    target_framework,
                    dependencies: Vec::new(),
                });
                let last = groups.len() - 1;
                &mut groups[last]
            }
        };
        if id.is_empty() {
            continue;
        }
        match VersionConstraint::parse(range) {
            Ok(constraint) => group
                .dependencies
                .push(PackageDependency::new(id, constraint)),
            Err(err) => warn!(id, range, error = %err, "skipping dependency with invalid range"),
        }
    }
    groups
}
