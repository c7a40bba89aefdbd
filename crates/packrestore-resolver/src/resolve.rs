use std::collections::BTreeMap;

use anyhow::Result;
use packrestore_core::{PackageVersion, RestoreError};
use tracing::info;

use crate::order::dependency_first_order;
use crate::provider::PackageProvider;
use crate::selection::select_assets;
use crate::types::{
    library_key, FrameworkRequest, LibraryKind, LibraryRecord, ResolvedGraph, ResolvedTarget,
    RestoreRequest, TargetLibrary,
};
use crate::walk::{walk_framework, FrameworkWalk};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Install the packages of one dependency level concurrently.
    pub parallel: bool,
}

/// Resolves every framework of `request`, producing one target per
/// framework plus one per (framework, runtime identifier).
pub fn resolve_restore_graph(
    provider: &dyn PackageProvider,
    request: &RestoreRequest,
    options: ResolveOptions,
) -> Result<ResolvedGraph> {
    let mut graph = ResolvedGraph::default();

    for framework_request in &request.frameworks {
        let walk = walk_framework(provider, framework_request, options.parallel)?;
        graph.warnings.extend(walk.warnings.iter().cloned());

        let short_name = framework_request.framework.short_folder_name();
        let mut direct = framework_request
            .dependencies
            .iter()
            .map(|dependency| format!("{} {}", dependency.id, dependency.constraint))
            .collect::<Vec<_>>();
        direct.sort_by_key(|entry| entry.to_ascii_lowercase());
        graph.project_dependencies.insert(short_name, direct);

        let runtimes = std::iter::once(None).chain(request.runtime_identifiers.iter().map(|rid| Some(rid.as_str())));
        for runtime_identifier in runtimes {
            let target = build_target(framework_request, &walk, runtime_identifier, &mut graph.libraries)?;
            info!(
                target = %target.name(),
                libraries = target.libraries.len(),
                "resolved target"
            );
            graph.targets.push(target);
        }
    }

    Ok(graph)
}

fn build_target(
    request: &FrameworkRequest,
    walk: &FrameworkWalk,
    runtime_identifier: Option<&str>,
    libraries: &mut BTreeMap<String, LibraryRecord>,
) -> Result<ResolvedTarget> {
    let mut target_libraries = Vec::with_capacity(walk.nodes.len() + request.projects.len());

    for node in &walk.nodes {
        let identity = &node.installed.identity;
        let assets = select_assets(
            &node.installed.files,
            &request.framework,
            &request.fallbacks,
            runtime_identifier,
        )
        .ok_or_else(|| RestoreError::IncompatibleFramework {
            id: identity.id.to_string(),
            version: identity.version.to_string(),
            framework: request.framework.short_folder_name(),
        })?;

        let mut library = TargetLibrary::new(identity.id.as_str(), identity.version.clone(), LibraryKind::Package);
        library.dependencies = node
            .dependencies
            .iter()
            .map(|dependency| (dependency.id.to_string(), dependency.constraint.to_string()))
            .collect();
        library.compile = assets.compile;
        library.runtime = assets.runtime;
        library.native = assets.native;
        library.build = assets.build;
        library.build_cross_targeting = assets.build_cross_targeting;
        library.framework = assets.framework;

        libraries
            .entry(library_key(identity.id.as_str(), &identity.version))
            .or_insert_with(|| LibraryRecord {
                name: identity.id.to_string(),
                version: identity.version.clone(),
                kind: LibraryKind::Package,
                path: format!(
                    "{}/{}",
                    identity.id.to_lower(),
                    identity.version.to_normalized_string().to_ascii_lowercase()
                ),
                sha512: Some(node.installed.sha512.clone()),
                files: node.installed.files.clone(),
            });
        target_libraries.push(library);
    }

    let project_version = PackageVersion::new(1, 0, 0);
    for project in &request.projects {
        let mut library = TargetLibrary::new(project.name.clone(), project_version.clone(), LibraryKind::Project);
        library.framework = Some(request.framework.short_folder_name());
        library.dependencies = project
            .dependencies
            .iter()
            .map(|dependency| (dependency.id.to_string(), dependency.constraint.to_string()))
            .chain(
                project
                    .references
                    .iter()
                    .map(|reference| (reference.clone(), project_version.to_string())),
            )
            .collect();
        libraries
            .entry(library_key(&project.name, &project_version))
            .or_insert_with(|| LibraryRecord {
                name: project.name.clone(),
                version: project_version.clone(),
                kind: LibraryKind::Project,
                path: project.path.clone(),
                sha512: None,
                files: Vec::new(),
            });
        target_libraries.push(library);
    }

    let order = dependency_first_order(&target_libraries)?;
    let mut slots = target_libraries.into_iter().map(Some).collect::<Vec<_>>();
    let libraries_in_order = order
        .into_iter()
        .filter_map(|index| slots.get_mut(index).and_then(Option::take))
        .collect();

    Ok(ResolvedTarget {
        framework: request.framework.clone(),
        runtime_identifier: runtime_identifier.map(str::to_string),
        libraries: libraries_in_order,
    })
}
