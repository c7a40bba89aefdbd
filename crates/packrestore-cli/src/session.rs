use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use packrestore_cache::{GlobalPackagesFolder, MachineCache, PackageFetcher};
use packrestore_feeds::{create_feed_client, HttpSource, HttpTransport, PackageSource, SourceAggregator};
use packrestore_security::{ConsoleCredentialProvider, CredentialService, PluginCredentialProvider};
use tracing::debug;

use crate::config::Settings;

const CONSOLE_PROMPT_TIMEOUT: Duration = Duration::from_secs(300);

/// Everything one command invocation shares: one http front end, one
/// credential cache, one set of feed clients and one package fetcher.
pub(crate) struct Session {
    pub sources: Vec<PackageSource>,
    pub http: Arc<HttpSource>,
    pub fetcher: Arc<PackageFetcher>,
}

impl Session {
    pub fn open(
        settings: &Settings,
        sources: Vec<PackageSource>,
        transport: Arc<dyn HttpTransport>,
        non_interactive: bool,
        use_machine_cache: bool,
    ) -> Result<Self> {
        let credentials = credential_service(settings, non_interactive);
        let http = Arc::new(
            HttpSource::new(transport, settings.http).with_credentials(Arc::new(credentials)),
        );

        let clients = sources
            .iter()
            .map(|source| create_feed_client(source, &http))
            .collect::<Vec<_>>();
        let aggregator = Arc::new(SourceAggregator::new(clients).with_behavior(settings.dependency_behavior));

        let global = Arc::new(GlobalPackagesFolder::new(&settings.global_packages_folder));
        let fallbacks = settings
            .fallback_package_folders
            .iter()
            .map(GlobalPackagesFolder::new)
            .collect::<Vec<_>>();
        let mut fetcher = PackageFetcher::new(global, aggregator).with_fallbacks(fallbacks);
        if use_machine_cache {
            fetcher = fetcher.with_machine_cache(Arc::new(MachineCache::new(
                &settings.machine_cache_folder,
                settings.machine_cache_ttl,
            )));
        }

        debug!(
            sources = sources.len(),
            global = %settings.global_packages_folder.display(),
            "opened session"
        );
        Ok(Self {
            sources,
            http,
            fetcher: Arc::new(fetcher),
        })
    }

    /// Global folder followed by the fallback folders, in lookup order.
    pub fn package_folders(&self) -> Vec<std::path::PathBuf> {
        std::iter::once(self.fetcher.global().root().to_path_buf())
            .chain(
                self.fetcher
                    .fallbacks()
                    .iter()
                    .map(|folder| folder.root().to_path_buf()),
            )
            .collect()
    }
}

fn credential_service(settings: &Settings, non_interactive: bool) -> CredentialService {
    let mut service = CredentialService::new(non_interactive);
    for provider in &settings.credential_providers {
        service = service.with_provider(
            Box::new(
                PluginCredentialProvider::new(&provider.name, &provider.path)
                    .with_args(provider.args.iter().cloned()),
            ),
            provider.timeout(),
        );
    }
    if !non_interactive {
        service = service.with_provider(Box::new(ConsoleCredentialProvider::stdio()), CONSOLE_PROMPT_TIMEOUT);
    }
    service
}
