use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use packrestore_assets::{
    is_no_op, record_restore, restore_inputs_hash, tool_assets_path, write_msbuild_files,
    AssetsFile, ProjectOutputs,
};
use packrestore_cache::{GlobalPackagesFolder, PackageFetcher, PackagesFolder};
use packrestore_core::{
    PackageArchive, PackageId, PackageIdentity, RestoreError, TargetFramework, VersionConstraint,
};
use packrestore_projects::{
    read_packages_config, read_solution, solution_packages_config, walk_projects, ProjectClosure,
    ProjectLoader, ProjectNode, ProjectStyle, SkippedProject, WalkOptions,
};
use packrestore_resolver::{
    check_min_client_version, dedupe_pinned_packages, resolve_restore_graph, FrameworkRequest,
    LibraryKind, PackageRequest, ResolveOptions, RestoreRequest,
};
use tracing::{debug, info, warn};

use crate::render::TerminalRenderer;
use crate::session::Session;

/// Framework tool reference graphs are resolved for.
pub(crate) const TOOL_FRAMEWORK: &str = "netcoreapp2.1";

const PROJECT_EXTENSIONS: &[&str] = &["csproj", "vbproj", "fsproj", "proj"];

/// What a restore was pointed at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RestoreInputs {
    pub projects: Vec<PathBuf>,
    /// Solution-level or standalone packages.config files.
    pub packages_configs: Vec<PathBuf>,
    /// Parent of the default legacy `packages/` folder.
    pub solution_dir: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RestoreOptions {
    pub parallel: bool,
    pub force: bool,
    pub p2p_timeout: Option<Duration>,
    pub packages_directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RestoreSummary {
    pub restored: Vec<String>,
    pub up_to_date: Vec<String>,
    pub skipped: Vec<SkippedProject>,
    pub legacy_installed: Vec<String>,
    pub tools: Vec<String>,
    pub warnings: Vec<String>,
}

enum ProjectOutcome {
    Restored { name: String, warnings: Vec<String> },
    UpToDate { name: String },
}

/// Resolves the restore target: a solution, a project file, a packages
/// config, or a directory holding exactly one of them.
pub(crate) fn discover_inputs(path: &Path) -> Result<RestoreInputs> {
    if !path.exists() {
        bail!("restore target does not exist: {}", path.display());
    }
    if path.is_dir() {
        return discover_in_directory(path);
    }

    let directory = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    if file_name.ends_with(".sln") {
        let projects = read_solution(path)?;
        let packages_configs = solution_packages_config(&directory).into_iter().collect();
        return Ok(RestoreInputs {
            projects,
            packages_configs,
            solution_dir: directory,
        });
    }
    if file_name.starts_with("packages") && file_name.ends_with(".config") {
        return Ok(RestoreInputs {
            projects: Vec::new(),
            packages_configs: vec![path.to_path_buf()],
            solution_dir: directory,
        });
    }
    Ok(RestoreInputs {
        projects: vec![path.to_path_buf()],
        packages_configs: Vec::new(),
        solution_dir: directory,
    })
}

fn discover_in_directory(dir: &Path) -> Result<RestoreInputs> {
    let mut solutions = Vec::new();
    let mut projects = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed reading directory: {}", dir.display()))? {
        let path = entry
            .with_context(|| format!("failed reading directory: {}", dir.display()))?
            .path();
        if !path.is_file() {
            continue;
        }
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if extension == "sln" {
            solutions.push(path);
        } else if PROJECT_EXTENSIONS.contains(&extension.as_str()) {
            projects.push(path);
        }
    }
    solutions.sort();
    projects.sort();

    match (solutions.as_slice(), projects.as_slice()) {
        ([solution], _) => discover_inputs(solution),
        ([], [project]) => discover_inputs(project),
        ([], []) => {
            let config = dir.join("packages.config");
            if config.is_file() {
                discover_inputs(&config)
            } else {
                bail!(
                    "no solution, project or packages.config found in '{}'",
                    dir.display()
                )
            }
        }
        ([], _) => bail!(
            "multiple project files found in '{}'; specify which one to restore",
            dir.display()
        ),
        _ => bail!(
            "multiple solution files found in '{}'; specify which one to restore",
            dir.display()
        ),
    }
}

pub(crate) fn run_restore(
    session: &Session,
    loader: &dyn ProjectLoader,
    inputs: &RestoreInputs,
    options: &RestoreOptions,
    renderer: TerminalRenderer,
) -> Result<RestoreSummary> {
    let mut summary = RestoreSummary::default();

    let closure = if inputs.projects.is_empty() {
        ProjectClosure::default()
    } else {
        let walk = WalkOptions {
            recursive: true,
            timeout: options.p2p_timeout,
        };
        walk_projects(loader, &inputs.projects, &walk)?
    };
    summary.skipped = closure.skipped().to_vec();
    info!(projects = closure.len(), skipped = summary.skipped.len(), "loaded project closure");

    summary.legacy_installed = restore_packages_config(session, &closure, inputs, options, renderer)?;
    summary.tools = restore_tools(session, &closure, options)?;

    let projects = closure.restorable().collect::<Vec<_>>();
    let mut progress = renderer.start_progress("restore", projects.len() as u64);
    let outcomes = if options.parallel && projects.len() > 1 {
        let closure = &closure;
        std::thread::scope(|scope| {
            let handles = projects
                .iter()
                .map(|project| scope.spawn(move || restore_project(session, closure, project, options)))
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow!("project restore thread panicked")))
                })
                .collect::<Vec<_>>()
        })
    } else {
        projects
            .iter()
            .map(|project| restore_project(session, &closure, project, options))
            .collect::<Vec<_>>()
    };

    for outcome in outcomes {
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                progress.finish_abandon();
                return Err(err);
            }
        };
        progress.inc();
        match outcome {
            ProjectOutcome::Restored { name, warnings } => {
                summary.restored.push(name);
                summary.warnings.extend(warnings);
            }
            ProjectOutcome::UpToDate { name } => summary.up_to_date.push(name),
        }
    }
    progress.finish_success();

    Ok(summary)
}

fn restore_project(
    session: &Session,
    closure: &ProjectClosure,
    project: &ProjectNode,
    options: &RestoreOptions,
) -> Result<ProjectOutcome> {
    let request = closure.restore_request(&project.path)?;
    let outputs = match project.style {
        ProjectStyle::PackageReference => ProjectOutputs::package_reference(&project.path),
        ProjectStyle::ProjectJson => ProjectOutputs::project_json(&project.path),
        other => bail!(
            "project '{}' uses {} restore and has no assets file",
            project.path.display(),
            other.as_str()
        ),
    };

    let inputs_hash = restore_inputs_hash(&request, &hash_context(session));
    if !options.force && is_no_op(&outputs, &inputs_hash) {
        info!(project = %project.name, "restore inputs unchanged, skipping");
        return Ok(ProjectOutcome::UpToDate {
            name: project.name.clone(),
        });
    }

    let fetcher: &PackageFetcher = &session.fetcher;
    let mut graph = resolve_restore_graph(
        fetcher,
        &request,
        ResolveOptions {
            parallel: options.parallel,
        },
    )
    .with_context(|| format!("failed to restore project '{}'", project.path.display()))?;
    graph.package_folders = session.package_folders();

    write_msbuild_files(&graph, &outputs)?;
    AssetsFile::for_project(&graph, &outputs).write(&outputs.assets_path)?;

    let mut expected = Vec::new();
    for library in graph.libraries.values() {
        if library.kind != LibraryKind::Package {
            continue;
        }
        let identity = PackageIdentity::new(library.name.as_str(), library.version.clone());
        if let Some(folder) = local_folder(fetcher, &identity) {
            expected.push(folder.hash_path(&identity).display().to_string());
        }
    }
    record_restore(&outputs, &inputs_hash, expected)?;

    for warning in &graph.warnings {
        warn!(project = %project.name, "{warning}");
    }
    info!(
        project = %project.name,
        libraries = graph.libraries.len(),
        assets = %outputs.assets_path.display(),
        "restored project"
    );
    Ok(ProjectOutcome::Restored {
        name: project.name.clone(),
        warnings: graph.warnings,
    })
}

/// Everything outside the request that changes what a restore produces.
fn hash_context(session: &Session) -> Vec<String> {
    let mut context = session
        .sources
        .iter()
        .map(|source| format!("source {}", source.location))
        .collect::<Vec<_>>();
    context.extend(
        session
            .package_folders()
            .iter()
            .map(|folder| format!("folder {}", folder.display())),
    );
    context.push(format!(
        "behavior {:?}",
        session.fetcher.aggregator().behavior()
    ));
    context
}

/// Installs every packages.config pin into the side-by-side packages
/// folder. Each file must pin an id at one version only.
fn restore_packages_config(
    session: &Session,
    closure: &ProjectClosure,
    inputs: &RestoreInputs,
    options: &RestoreOptions,
    renderer: TerminalRenderer,
) -> Result<Vec<String>> {
    let mut pinned: Vec<Vec<PackageIdentity>> = Vec::new();
    for path in &inputs.packages_configs {
        let entries = read_packages_config(path)?;
        pinned.push(entries.into_iter().map(|entry| entry.identity).collect());
    }
    for project in closure.packages_config_projects() {
        pinned.push(
            project
                .packages_config
                .iter()
                .map(|entry| entry.identity.clone())
                .collect(),
        );
    }

    let mut identities = Vec::new();
    let mut seen = BTreeSet::new();
    for list in &pinned {
        for identity in dedupe_pinned_packages(list)? {
            if seen.insert(identity.file_stem().to_ascii_lowercase()) {
                identities.push(identity);
            }
        }
    }
    if identities.is_empty() {
        return Ok(Vec::new());
    }

    let root = options
        .packages_directory
        .clone()
        .unwrap_or_else(|| inputs.solution_dir.join("packages"));
    let folder = PackagesFolder::new(&root);
    let fetcher: &PackageFetcher = &session.fetcher;

    let mut progress = renderer.start_progress("packages", identities.len() as u64);
    let mut installed = Vec::new();
    for identity in &identities {
        let result = install_pinned(fetcher, &folder, identity);
        match result {
            Ok(true) => installed.push(identity.file_stem()),
            Ok(false) => debug!(package = %identity, "already in packages folder"),
            Err(err) => {
                progress.finish_abandon();
                return Err(err);
            }
        }
        progress.inc();
    }
    progress.finish_success();
    info!(installed = installed.len(), folder = %root.display(), "restored packages.config packages");
    Ok(installed)
}

fn install_pinned(fetcher: &PackageFetcher, folder: &PackagesFolder, identity: &PackageIdentity) -> Result<bool> {
    if folder.exists(identity) {
        return Ok(false);
    }
    let bytes = match local_folder(fetcher, identity) {
        Some(local) => {
            let path = local.nupkg_path(identity);
            fs::read(&path).with_context(|| format!("failed reading package: {}", path.display()))?
        }
        None => fetcher.download(identity, None)?,
    };
    let archive = PackageArchive::from_bytes(bytes)
        .with_context(|| format!("failed to read package '{identity}'"))?;
    check_min_client_version(archive.manifest())?;
    folder.install(identity, archive.bytes())
}

/// Resolves each distinct tool reference once and writes its shared
/// assets file.
fn restore_tools(session: &Session, closure: &ProjectClosure, options: &RestoreOptions) -> Result<Vec<String>> {
    let mut seen = BTreeSet::new();
    let mut tools = Vec::new();
    for project in closure.restorable() {
        for tool in &project.tools {
            if seen.insert((tool.id.to_ascii_lowercase(), tool.constraint.to_string())) {
                tools.push(tool.clone());
            }
        }
    }
    if tools.is_empty() {
        return Ok(Vec::new());
    }

    let framework = TargetFramework::parse(TOOL_FRAMEWORK)?;
    let fetcher: &PackageFetcher = &session.fetcher;
    let mut restored = Vec::new();
    for tool in tools {
        let id = PackageId::from(tool.id.as_str());
        let selected = fetcher
            .resolve(&id, &tool.constraint)?
            .ok_or_else(|| RestoreError::VersionNotFound {
                id: tool.id.clone(),
                requested: tool.constraint.to_string(),
            })?;
        let version = selected.identity.version.clone();
        let path = tool_assets_path(fetcher.global().root(), &id, &version, &framework);
        if path.is_file() && !options.force {
            debug!(tool = %selected.identity, "tool already restored");
            restored.push(selected.identity.file_stem());
            continue;
        }

        let mut framework_request = FrameworkRequest::new(framework.clone());
        framework_request.dependencies.push(PackageRequest::new(
            id.clone(),
            VersionConstraint::Exact(version.clone()),
        ));
        let request = RestoreRequest {
            frameworks: vec![framework_request],
            runtime_identifiers: Vec::new(),
        };
        let mut graph = resolve_restore_graph(fetcher, &request, ResolveOptions::default())
            .with_context(|| format!("failed to restore tool '{}'", selected.identity))?;
        graph.package_folders = session.package_folders();
        AssetsFile::for_tool(&graph).write(&path)?;
        info!(tool = %selected.identity, path = %path.display(), "restored tool");
        restored.push(selected.identity.file_stem());
    }
    Ok(restored)
}

/// First local folder, global then fallbacks, holding a complete install.
fn local_folder<'a>(fetcher: &'a PackageFetcher, identity: &PackageIdentity) -> Option<&'a GlobalPackagesFolder> {
    std::iter::once(fetcher.global())
        .chain(fetcher.fallbacks().iter())
        .find(|folder| folder.exists(identity))
}
