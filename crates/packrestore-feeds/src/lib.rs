mod aggregator;
mod feed;
mod folder;
mod http;
mod memory;
mod push;
mod source_state;
mod source_store;
mod source_types;
mod v2;
mod v3;

pub use aggregator::{ResolvedRemote, SourceAggregator};
pub use feed::{create_feed_client, FeedClient};
pub use folder::LocalFolderFeed;
pub use http::{
    HttpMethod, HttpRequest, HttpResponse, HttpSettings, HttpSource, HttpTransport,
    ReqwestTransport,
};
pub use memory::MemoryTransport;
pub use push::{push_endpoint, PushClient, PushOutcome, API_KEY_HEADER};
pub use source_state::validate_source_name;
pub use source_store::SourceStore;
pub use source_types::{PackageSource, SourceProtocol};
pub use v2::{parse_dependencies, parse_feed, V2FeedClient, V2PackageEntry};
pub use v3::{ServiceIndex, V3FeedClient};
