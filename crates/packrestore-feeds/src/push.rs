use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use packrestore_core::{PackageArchive, RestoreError};
use packrestore_security::{sha256_hex, sha512_base64};
use tracing::{info, warn};
use url::Url;

use crate::http::{HttpRequest, HttpSource};
use crate::v3::{V3FeedClient, PACKAGE_PUBLISH};
use crate::{PackageSource, SourceProtocol};

pub const API_KEY_HEADER: &str = "X-NuGet-ApiKey";
const V2_PUSH_PATH: &str = "api/v2/package/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Created,
    AlreadyExists,
}

pub struct PushClient {
    http: Arc<HttpSource>,
}

impl PushClient {
    pub fn new(http: Arc<HttpSource>) -> Self {
        Self { http }
    }

    pub fn push(
        &self,
        source: &PackageSource,
        package: &[u8],
        api_key: Option<&str>,
        skip_duplicate: bool,
    ) -> Result<PushOutcome> {
        let archive = PackageArchive::from_bytes(package.to_vec())
            .context("refusing to push an invalid package")?;
        let identity = archive.identity();

        let outcome = match source.resolved_protocol() {
            SourceProtocol::Folder => push_to_folder(source, &archive)?,
            protocol => {
                let endpoint = match protocol {
                    SourceProtocol::V3 => V3FeedClient::new(source.clone(), Arc::clone(&self.http))
                        .service_index()?
                        .resource(PACKAGE_PUBLISH)
                        .map(str::to_string)
                        .ok_or_else(|| anyhow!("source '{}' does not accept pushes", source.name))?,
                    _ => push_endpoint(&source.location)?,
                };
                self.push_http(&endpoint, package, api_key)?
            }
        };

        match outcome {
            PushOutcome::Created => info!(package = %identity, source = %source.name, "pushed"),
            PushOutcome::AlreadyExists if skip_duplicate => {
                warn!(package = %identity, source = %source.name, "package already exists, skipping")
            }
            PushOutcome::AlreadyExists => {
                anyhow::bail!(
                    "package '{}' already exists at source '{}'",
                    identity,
                    source.name
                );
            }
        }
        Ok(outcome)
    }

    fn push_http(&self, endpoint: &str, package: &[u8], api_key: Option<&str>) -> Result<PushOutcome> {
        let boundary = format!("packrestore-{}", &sha256_hex(package)[..24]);
        let mut request = HttpRequest::put(endpoint, multipart_body(&boundary, package))
            .with_header("Content-Type", format!("multipart/form-data; boundary=\"{boundary}\""));
        if let Some(api_key) = api_key {
            request = request.with_header(API_KEY_HEADER, api_key);
        }

        let response = self.http.send(request)?;
        match response.status {
            200 | 201 | 202 => Ok(PushOutcome::Created),
            409 => Ok(PushOutcome::AlreadyExists),
            status => Err(RestoreError::HttpStatus {
                url: endpoint.to_string(),
                status,
            }
            .into()),
        }
    }
}

/// Push url for an http source: a host-only location gets the v2 package
/// path appended.
pub fn push_endpoint(location: &str) -> Result<String> {
    let url = Url::parse(location).with_context(|| format!("invalid source url '{location}'"))?;
    if url.path().trim_matches('/').is_empty() {
        let joined = url
            .join(V2_PUSH_PATH)
            .with_context(|| format!("invalid source url '{location}'"))?;
        return Ok(joined.to_string());
    }
    Ok(location.to_string())
}

fn multipart_body(boundary: &str, package: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(package.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"package\"; filename=\"package.nupkg\"\r\n",
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(package);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

/// Copies the package into a folder feed using the `{id}/{version}/` layout.
fn push_to_folder(source: &PackageSource, archive: &PackageArchive) -> Result<PushOutcome> {
    let identity = archive.identity();
    let root = PathBuf::from(
        source
            .location
            .strip_prefix("file://")
            .unwrap_or(&source.location),
    );
    let id = identity.id.to_lower();
    let version = identity.version.to_normalized_string().to_ascii_lowercase();
    let dir = root.join(&id).join(&version);
    let nupkg = dir.join(identity.nupkg_file_name());
    if nupkg.exists() {
        return Ok(PushOutcome::AlreadyExists);
    }

    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create directory: {}", dir.display()))?;
    fs::write(&nupkg, archive.bytes())
        .with_context(|| format!("failed to write package: {}", nupkg.display()))?;
    let nuspec = dir.join(format!("{id}.nuspec"));
    fs::write(&nuspec, archive.manifest().to_nuspec_xml()?)
        .with_context(|| format!("failed to write manifest: {}", nuspec.display()))?;
    let hash = dir.join(format!("{}.sha512", identity.nupkg_file_name()));
    fs::write(&hash, sha512_base64(archive.bytes()))
        .with_context(|| format!("failed to write package hash: {}", hash.display()))?;
    Ok(PushOutcome::Created)
}
