use std::sync::Arc;

use anyhow::Result;
use packrestore_core::{PackageId, PackageIdentity, PackageVersion};

use crate::folder::LocalFolderFeed;
use crate::http::HttpSource;
use crate::v2::V2FeedClient;
use crate::v3::V3FeedClient;
use crate::{PackageSource, SourceProtocol};

/// One package source.
///
/// `list_versions` returns an empty list when the source does not know the
/// id and `fetch` returns `None` when the version is missing; both are
/// ordinary answers, not errors.
pub trait FeedClient: Send + Sync {
    fn source(&self) -> &PackageSource;

    fn list_versions(&self, id: &PackageId) -> Result<Vec<PackageVersion>>;

    /// Raw `.nupkg` bytes.
    fn fetch(&self, identity: &PackageIdentity) -> Result<Option<Vec<u8>>>;

    fn find_latest(
        &self,
        id: &PackageId,
        include_prerelease: bool,
    ) -> Result<Option<PackageVersion>> {
        Ok(self
            .list_versions(id)?
            .into_iter()
            .filter(|version| include_prerelease || !version.is_prerelease())
            .max())
    }
}

pub fn create_feed_client(source: &PackageSource, http: &Arc<HttpSource>) -> Arc<dyn FeedClient> {
    match source.resolved_protocol() {
        SourceProtocol::V3 => Arc::new(V3FeedClient::new(source.clone(), Arc::clone(http))),
        SourceProtocol::V2 => Arc::new(V2FeedClient::new(source.clone(), Arc::clone(http))),
        SourceProtocol::Folder => Arc::new(LocalFolderFeed::new(source.clone())),
    }
}
