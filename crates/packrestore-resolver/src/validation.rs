use std::collections::BTreeMap;

use packrestore_core::{
    client_compatibility_version, PackageId, PackageIdentity, PackageManifest, RestoreError,
};

/// Fails when `manifest` needs a newer client than this one.
pub fn check_min_client_version(manifest: &PackageManifest) -> Result<(), RestoreError> {
    let current = client_compatibility_version();
    match &manifest.min_client_version {
        Some(required) if *required > current => Err(RestoreError::MinClientVersion {
            id: manifest.id.to_string(),
            version: manifest.version.to_string(),
            required: required.to_string(),
            current: current.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Collapses repeated identical pins and rejects ids pinned at more than
/// one version. The error lists every conflicting `id.version`, sorted by
/// id then version.
pub fn dedupe_pinned_packages(entries: &[PackageIdentity]) -> Result<Vec<PackageIdentity>, RestoreError> {
    let mut by_id: BTreeMap<String, (PackageId, Vec<PackageIdentity>)> = BTreeMap::new();
    for entry in entries {
        let (_, versions) = by_id
            .entry(entry.id.to_lower())
            .or_insert_with(|| (entry.id.clone(), Vec::new()));
        if !versions.iter().any(|existing| existing.version == entry.version) {
            versions.push(entry.clone());
        }
    }

    let mut conflicts = Vec::new();
    for (_, versions) in by_id.values() {
        if versions.len() > 1 {
            let mut sorted = versions.clone();
            sorted.sort_by(|left, right| left.version.cmp(&right.version));
            conflicts.extend(sorted.iter().map(PackageIdentity::file_stem));
        }
    }
    if !conflicts.is_empty() {
        return Err(RestoreError::DuplicatePackages {
            packages: conflicts,
        });
    }

    let mut unique = Vec::new();
    for entry in entries {
        if !unique.iter().any(|kept: &PackageIdentity| kept.id == entry.id) {
            unique.push(entry.clone());
        }
    }
    Ok(unique)
}
