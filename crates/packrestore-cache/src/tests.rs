use super::*;
use packrestore_core::{
    PackageArchiveBuilder, PackageId, PackageIdentity, PackageManifest, PackageVersion,
    VersionConstraint,
};
use packrestore_feeds::{
    FeedClient, HttpSettings, HttpSource, LocalFolderFeed, MemoryTransport, PackageSource,
    SourceAggregator, V3FeedClient,
};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn v(raw: &str) -> PackageVersion {
    PackageVersion::parse(raw).expect("valid version")
}

fn identity(id: &str, version: &str) -> PackageIdentity {
    PackageIdentity::new(id, v(version))
}

fn nupkg(id: &str, version: &str) -> Vec<u8> {
    PackageArchiveBuilder::new(PackageManifest::new(id, v(version)))
        .file(format!("build/{id}.props"), "<Project />")
        .file("lib/net45/a.dll", "dll")
        .build()
        .expect("build package")
}

fn folder_aggregator(root: &std::path::Path) -> Arc<SourceAggregator> {
    let feed: Arc<dyn FeedClient> = Arc::new(LocalFolderFeed::new(PackageSource::new(
        "local",
        root.display().to_string(),
    )));
    Arc::new(SourceAggregator::new(vec![feed]))
}

#[test]
fn machine_cache_round_trips_entry() {
    let root = tempfile::tempdir().expect("tempdir");
    let cache = MachineCache::new(root.path(), DEFAULT_MACHINE_CACHE_TTL);
    let package = identity("packageA", "1.0.0");

    assert!(cache.try_get(&package).expect("lookup").is_none());
    let path = cache.put(&package, &nupkg("packageA", "1.0.0")).expect("must put");
    assert!(path.ends_with("packagea/packagea.1.0.0.nupkg"));
    assert!(cache.try_get(&package).expect("lookup").is_some());

    let entry = cache.entry(&package).expect("entry").expect("live entry");
    assert_eq!(entry.blob_path, path);
    assert!(!path.with_file_name("packagea.1.0.0.nupkg.part").exists());
}

#[test]
fn machine_cache_expired_entry_is_a_miss() {
    let root = tempfile::tempdir().expect("tempdir");
    let cache = MachineCache::new(root.path(), Duration::ZERO);
    let package = identity("packageA", "1.0.0");
    cache.put(&package, &nupkg("packageA", "1.0.0")).expect("must put");
    assert!(cache.try_get(&package).expect("lookup").is_none());
}

#[test]
fn machine_cache_corrupt_entry_is_refetched() {
    let root = tempfile::tempdir().expect("tempdir");
    let cache = MachineCache::new(root.path(), DEFAULT_MACHINE_CACHE_TTL);
    let package = identity("packageA", "1.0.0");
    let path = cache.put(&package, b"not a zip").expect("must put");

    assert!(cache.try_get(&package).expect("corrupt entry is a miss").is_none());
    assert!(!path.exists());

    let fetched = AtomicUsize::new(0);
    let bytes = cache
        .get_or_fetch(&package, || {
            fetched.fetch_add(1, Ordering::SeqCst);
            Ok(nupkg("packageA", "1.0.0"))
        })
        .expect("must refetch");
    assert!(!bytes.is_empty());
    assert_eq!(fetched.load(Ordering::SeqCst), 1);
}

#[test]
fn machine_cache_fetches_once_under_contention() {
    let root = tempfile::tempdir().expect("tempdir");
    let cache = MachineCache::new(root.path(), DEFAULT_MACHINE_CACHE_TTL);
    let package = identity("tool", "1.0.0");
    let fetched = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for _ in 0..10 {
            scope.spawn(|| {
                cache
                    .get_or_fetch(&package, || {
                        fetched.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(20));
                        Ok(nupkg("tool", "1.0.0"))
                    })
                    .expect("must fetch");
            });
        }
    });
    assert_eq!(fetched.load(Ordering::SeqCst), 1);
}

#[test]
fn keyed_locks_drop_slots_once_callers_finish() {
    let locks = locks::KeyedLocks::default();
    let running = AtomicUsize::new(0);
    let overlapped = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for i in 0..16 {
            let key = format!("package{}", i % 4);
            let (locks, running, overlapped) = (&locks, &running, &overlapped);
            scope.spawn(move || {
                locks
                    .run(&key, || {
                        if key == "package0" && running.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlapped.fetch_add(1, Ordering::SeqCst);
                        }
                        std::thread::sleep(Duration::from_millis(5));
                        if key == "package0" {
                            running.fetch_sub(1, Ordering::SeqCst);
                        }
                        Ok(())
                    })
                    .expect("must run");
            });
        }
    });

    assert_eq!(overlapped.load(Ordering::SeqCst), 0);
    assert_eq!(locks.len(), 0);

    let err = locks
        .run("failing", || -> anyhow::Result<()> { Err(anyhow::anyhow!("boom")) })
        .expect_err("work error propagates");
    assert!(err.to_string().contains("boom"));
    assert_eq!(locks.len(), 0);
}

#[test]
fn machine_cache_clear_removes_entries() {
    let root = tempfile::tempdir().expect("tempdir");
    let cache = MachineCache::new(root.path().join("http-cache"), DEFAULT_MACHINE_CACHE_TTL);
    let package = identity("packageA", "1.0.0");
    cache.put(&package, &nupkg("packageA", "1.0.0")).expect("must put");

    cache.clear().expect("must clear");
    assert!(!cache.root().exists());
    assert!(cache.try_get(&package).expect("lookup").is_none());
    cache.clear().expect("clearing twice is fine");
}

#[test]
fn global_folder_install_writes_layout_and_marker() {
    let root = tempfile::tempdir().expect("tempdir");
    let global = GlobalPackagesFolder::new(root.path());
    let package = identity("PackageA", "1.0.0-Beta");

    let installed = global
        .install(&package, nupkg("PackageA", "1.0.0-Beta"))
        .expect("must install");
    let dir = root.path().join("packagea").join("1.0.0-beta");
    assert_eq!(installed.directory, dir);
    assert!(dir.join("packagea.1.0.0-beta.nupkg").is_file());
    assert!(dir.join("packagea.nuspec").is_file());
    assert!(dir.join("packagea.1.0.0-beta.nupkg.sha512").is_file());
    assert_eq!(installed.files, vec!["build/PackageA.props", "lib/net45/a.dll"]);
    assert_eq!(installed.identity.id.as_str(), "PackageA");
    assert!(global.exists(&package));
    assert_eq!(
        global.versions(&PackageId::new("packagea")).expect("versions"),
        vec![v("1.0.0-beta")]
    );
}

#[test]
fn global_folder_reinstall_is_noop() {
    let root = tempfile::tempdir().expect("tempdir");
    let global = GlobalPackagesFolder::new(root.path());
    let package = identity("packageA", "1.0.0");
    global
        .install(&package, nupkg("packageA", "1.0.0"))
        .expect("must install");
    let marker = global.hash_path(&package);
    let before = fs::metadata(&marker).and_then(|m| m.modified()).expect("mtime");

    let fetched = AtomicUsize::new(0);
    global
        .install_with(&package, || {
            fetched.fetch_add(1, Ordering::SeqCst);
            Ok(nupkg("packageA", "1.0.0"))
        })
        .expect("reinstall must succeed");
    let after = fs::metadata(&marker).and_then(|m| m.modified()).expect("mtime");
    assert_eq!(fetched.load(Ordering::SeqCst), 0);
    assert_eq!(before, after);
}

#[test]
fn global_folder_reinstalls_incomplete_or_corrupt_directory() {
    let root = tempfile::tempdir().expect("tempdir");
    let global = GlobalPackagesFolder::new(root.path());
    let package = identity("packageA", "1.0.0");

    let dir = global.package_dir(&package);
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("stale.txt"), "left over").expect("write");
    assert!(!global.exists(&package));
    global
        .install(&package, nupkg("packageA", "1.0.0"))
        .expect("must install over partial directory");
    assert!(!dir.join("stale.txt").exists());

    fs::write(global.nuspec_path(&package), "<package><broken").expect("corrupt nuspec");
    assert!(global.installed(&package).expect("lookup").is_none());
    let installed = global
        .install(&package, nupkg("packageA", "1.0.0"))
        .expect("must reinstall corrupt package");
    assert_eq!(installed.manifest.version, v("1.0.0"));
}

#[test]
fn global_folder_rejects_mismatched_package() {
    let root = tempfile::tempdir().expect("tempdir");
    let global = GlobalPackagesFolder::new(root.path());
    let err = global
        .install(&identity("packageA", "1.0.0"), nupkg("packageB", "1.0.0"))
        .expect_err("mismatched package must fail");
    assert!(err.to_string().contains("packageB 1.0.0"));
    assert!(!global.exists(&identity("packageA", "1.0.0")));
}

#[test]
fn packages_folder_uses_side_by_side_layout() {
    let root = tempfile::tempdir().expect("tempdir");
    let folder = PackagesFolder::new(root.path().join("packages"));
    let package = identity("packageA", "1.0.0");

    assert!(folder
        .install(&package, &nupkg("packageA", "1.0.0"))
        .expect("must install"));
    assert!(!folder
        .install(&package, &nupkg("packageA", "1.0.0"))
        .expect("second install is a no-op"));
    let dir = root.path().join("packages").join("packageA.1.0.0");
    assert!(dir.join("packageA.1.0.0.nupkg").is_file());
    assert!(dir.join("build").join("packageA.props").is_file());
    assert_eq!(folder.installed().expect("list"), vec!["packageA.1.0.0"]);
}

#[test]
fn fetcher_prefers_local_folders_for_exact_minimum() {
    let feed_root = tempfile::tempdir().expect("tempdir");
    let global_root = tempfile::tempdir().expect("tempdir");
    fs::write(feed_root.path().join("x.2.0.0.nupkg"), nupkg("x", "2.0.0")).expect("write");
    let global = Arc::new(GlobalPackagesFolder::new(global_root.path()));
    global
        .install(&identity("x", "1.0.0"), nupkg("x", "1.0.0"))
        .expect("seed global folder");

    let fetcher = PackageFetcher::new(Arc::clone(&global), folder_aggregator(feed_root.path()));
    let id = PackageId::new("x");
    let selected = fetcher
        .resolve(&id, &VersionConstraint::parse("1.0.0").expect("range"))
        .expect("resolve")
        .expect("must resolve");
    assert_eq!(selected.identity.version, v("1.0.0"));
    assert!(selected.source_index.is_none());

    let selected = fetcher
        .resolve(&id, &VersionConstraint::parse("2.0.0").expect("range"))
        .expect("resolve")
        .expect("must resolve");
    assert_eq!(selected.source_index, Some(0));
    let installed = fetcher
        .ensure_installed(&selected.identity, selected.source_index)
        .expect("must install");
    assert!(installed.directory.starts_with(global_root.path()));
}

#[test]
fn fetcher_reads_fallback_folders_without_installing() {
    let feed_root = tempfile::tempdir().expect("tempdir");
    let global_root = tempfile::tempdir().expect("tempdir");
    let fallback_root = tempfile::tempdir().expect("tempdir");
    GlobalPackagesFolder::new(fallback_root.path())
        .install(&identity("y", "1.0.0"), nupkg("y", "1.0.0"))
        .expect("seed fallback");

    let fetcher = PackageFetcher::new(
        Arc::new(GlobalPackagesFolder::new(global_root.path())),
        folder_aggregator(feed_root.path()),
    )
    .with_fallbacks(vec![GlobalPackagesFolder::new(fallback_root.path())]);
    let installed = fetcher
        .ensure_installed(&identity("y", "1.0.0"), None)
        .expect("must locate in fallback");
    assert!(installed.directory.starts_with(fallback_root.path()));
    assert!(!fetcher.global().exists(&identity("y", "1.0.0")));
}

#[test]
fn fetcher_keeps_cached_version_after_server_side_delete() {
    let url = "https://feed.test/index.json";
    let transport = Arc::new(
        MemoryTransport::new()
            .get_bytes(
                url,
                r#"{"resources":[{"@id":"https://feed.test/flat/","@type":"PackageBaseAddress/3.0.0"}]}"#,
            )
            .get_bytes(
                "https://feed.test/flat/x/index.json",
                r#"{"versions":["2.0.0"]}"#,
            ),
    );
    let http = Arc::new(HttpSource::new(
        transport.clone(),
        HttpSettings {
            retry_delay: Duration::ZERO,
            ..HttpSettings::default()
        },
    ));
    let feed: Arc<dyn FeedClient> = Arc::new(V3FeedClient::new(PackageSource::new("v3", url), http));
    let global_root = tempfile::tempdir().expect("tempdir");
    let global = Arc::new(GlobalPackagesFolder::new(global_root.path()));
    global
        .install(&identity("x", "1.0.0"), nupkg("x", "1.0.0"))
        .expect("seed cached version");

    let fetcher = PackageFetcher::new(global, Arc::new(SourceAggregator::new(vec![feed])));
    let selected = fetcher
        .resolve(&PackageId::new("x"), &VersionConstraint::parse("[1.0.0]").expect("range"))
        .expect("resolve")
        .expect("cached version must resolve");
    assert_eq!(selected.identity.version, v("1.0.0"));
    assert!(fetcher.ensure_installed(&selected.identity, None).is_ok());
    assert!(transport.requests().is_empty());
}

#[test]
fn fetcher_installs_once_for_many_concurrent_requests() {
    let feed_root = tempfile::tempdir().expect("tempdir");
    fs::write(feed_root.path().join("tool.1.0.0.nupkg"), nupkg("tool", "1.0.0")).expect("write");
    let cache_root = tempfile::tempdir().expect("tempdir");
    let global_root = tempfile::tempdir().expect("tempdir");

    let fetcher = PackageFetcher::new(
        Arc::new(GlobalPackagesFolder::new(global_root.path())),
        folder_aggregator(feed_root.path()),
    )
    .with_machine_cache(Arc::new(MachineCache::new(cache_root.path(), DEFAULT_MACHINE_CACHE_TTL)));
    let tool = identity("tool", "1.0.0");

    std::thread::scope(|scope| {
        for _ in 0..10 {
            scope.spawn(|| {
                fetcher.ensure_installed(&tool, Some(0)).expect("must install");
            });
        }
    });
    let installs = fs::read_dir(global_root.path().join("tool"))
        .expect("tool dir")
        .count();
    assert_eq!(installs, 1);
    assert!(fetcher.machine_cache().is_some_and(|cache| cache.try_get(&tool).is_ok_and(|hit| hit.is_some())));
}
