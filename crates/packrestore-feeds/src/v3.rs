use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use packrestore_core::{PackageId, PackageIdentity, PackageVersion, RestoreError};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::feed::FeedClient;
use crate::http::HttpSource;
use crate::PackageSource;

pub const PACKAGE_BASE_ADDRESS: &str = "PackageBaseAddress/3.0.0";
pub const REGISTRATIONS_BASE_URL: &str = "RegistrationsBaseUrl";
pub const PACKAGE_PUBLISH: &str = "PackagePublish/2.0.0";

#[derive(Debug, Deserialize)]
struct ServiceIndexDocument {
    #[serde(default)]
    resources: Vec<ServiceResourceDocument>,
}

#[derive(Debug, Deserialize)]
struct ServiceResourceDocument {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@type")]
    kind: Value,
}

/// Resource type to url map from a v3 `index.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceIndex {
    resources: Vec<(String, String)>,
}

impl ServiceIndex {
    pub fn parse(content: &[u8]) -> Result<Self> {
        let document: ServiceIndexDocument = serde_json::from_slice(content)?;
        let mut resources = Vec::new();
        for resource in document.resources {
            match resource.kind {
                Value::String(kind) => resources.push((kind, resource.id)),
                Value::Array(kinds) => {
                    for kind in kinds.into_iter().filter_map(|kind| kind.as_str().map(str::to_string)) {
                        resources.push((kind, resource.id.clone()));
                    }
                }
                _ => {}
            }
        }
        Ok(Self { resources })
    }

    /// First resource whose type is `kind` or a versioned form of it.
    pub fn resource(&self, kind: &str) -> Option<&str> {
        let prefix = format!("{kind}/");
        self.resources
            .iter()
            .find(|(candidate, _)| candidate == kind || candidate.starts_with(&prefix))
            .map(|(_, url)| url.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct FlatContainerVersions {
    #[serde(default)]
    versions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RegistrationIndex {
    #[serde(default)]
    items: Vec<RegistrationPage>,
}

#[derive(Debug, Deserialize)]
struct RegistrationPage {
    #[serde(rename = "@id")]
    id: String,
    #[serde(default)]
    items: Option<Vec<RegistrationLeaf>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationLeaf {
    catalog_entry: RegistrationCatalogEntry,
    #[serde(default)]
    package_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegistrationCatalogEntry {
    version: String,
    #[serde(default = "listed_default")]
    listed: bool,
}

fn listed_default() -> bool {
    true
}

/// Client for JSON-index feeds: the service index is read once per session,
/// then versions come from the flat container (or registration blobs when a
/// feed has no flat container).
pub struct V3FeedClient {
    source: PackageSource,
    http: Arc<HttpSource>,
    service_index: Mutex<Option<Arc<ServiceIndex>>>,
}

impl V3FeedClient {
    pub fn new(source: PackageSource, http: Arc<HttpSource>) -> Self {
        Self {
            source,
            http,
            service_index: Mutex::new(None),
        }
    }

    pub fn service_index(&self) -> Result<Arc<ServiceIndex>> {
        let mut cached = self
            .service_index
            .lock()
            .map_err(|_| anyhow!("service index lock poisoned"))?;
        if let Some(index) = cached.as_ref() {
            return Ok(Arc::clone(index));
        }

        let url = &self.source.location;
        let body = self.http.get_bytes(url)?.ok_or_else(|| RestoreError::HttpStatus {
            url: url.clone(),
            status: 404,
        })?;
        let index = ServiceIndex::parse(&body).map_err(|err| RestoreError::Protocol {
            url: url.clone(),
            message: format!("invalid service index: {err}"),
        })?;
        debug!(source = %self.source.name, resources = index.resources.len(), "loaded service index");
        let index = Arc::new(index);
        *cached = Some(Arc::clone(&index));
        Ok(index)
    }

    fn package_base_address(&self) -> Result<Option<String>> {
        Ok(self
            .service_index()?
            .resource(PACKAGE_BASE_ADDRESS)
            .map(with_trailing_slash))
    }

    fn registration_base(&self) -> Result<String> {
        self.service_index()?
            .resource(REGISTRATIONS_BASE_URL)
            .map(with_trailing_slash)
            .ok_or_else(|| {
                RestoreError::Protocol {
                    url: self.source.location.clone(),
                    message: "service index has neither PackageBaseAddress nor RegistrationsBaseUrl"
                        .to_string(),
                }
                .into()
            })
    }

    /// Listed versions with their download urls from the registration blob.
    pub fn registration_entries(&self, id: &PackageId) -> Result<Vec<(PackageVersion, Option<String>)>> {
        let url = format!("{}{}/index.json", self.registration_base()?, id.to_lower());
        let Some(index) = self.http.get_json::<RegistrationIndex>(&url)? else {
            return Ok(Vec::new());
        };

        let mut entries = Vec::new();
        for page in index.items {
            let leaves = match page.items {
                Some(items) => items,
                None => match self.http.get_json::<RegistrationPage>(&page.id)? {
                    Some(fetched) => fetched.items.unwrap_or_default(),
                    None => {
                        warn!(url = %page.id, "registration page not found");
                        Vec::new()
                    }
                },
            };
            for leaf in leaves.into_iter().filter(|leaf| leaf.catalog_entry.listed) {
                match PackageVersion::parse(&leaf.catalog_entry.version) {
                    Ok(version) => entries.push((version, leaf.package_content)),
                    Err(err) => warn!(url = %url, error = %err, "skipping invalid version"),
                }
            }
        }
        Ok(entries)
    }

    fn flat_container_url(base: &str, identity: &PackageIdentity) -> String {
        let id = identity.id.to_lower();
        let version = identity.version.to_normalized_string().to_ascii_lowercase();
        format!("{base}{id}/{version}/{id}.{version}.nupkg")
    }
}

impl FeedClient for V3FeedClient {
    fn source(&self) -> &PackageSource {
        &self.source
    }

    fn list_versions(&self, id: &PackageId) -> Result<Vec<PackageVersion>> {
        let Some(base) = self.package_base_address()? else {
            return Ok(self
                .registration_entries(id)?
                .into_iter()
                .map(|(version, _)| version)
                .collect());
        };

        let url = format!("{base}{}/index.json", id.to_lower());
        let Some(listing) = self.http.get_json::<FlatContainerVersions>(&url)? else {
            return Ok(Vec::new());
        };
        let mut versions = Vec::with_capacity(listing.versions.len());
        for raw in listing.versions {
            match PackageVersion::parse(&raw) {
                Ok(version) => versions.push(version),
                Err(err) => warn!(url = %url, error = %err, "skipping invalid version"),
            }
        }
        versions.sort();
        Ok(versions)
    }

    fn fetch(&self, identity: &PackageIdentity) -> Result<Option<Vec<u8>>> {
        if let Some(base) = self.package_base_address()? {
            return self.http.get_bytes(&Self::flat_container_url(&base, identity));
        }

        let content = self
            .registration_entries(&identity.id)?
            .into_iter()
            .find(|(version, _)| version == &identity.version)
            .and_then(|(_, content)| content);
        match content {
            Some(url) => self.http.get_bytes(&url),
            None => Ok(None),
        }
    }
}

fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}
