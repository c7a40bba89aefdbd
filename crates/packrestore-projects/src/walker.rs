use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use packrestore_core::{RestoreError, TargetFramework};
use packrestore_resolver::{FrameworkRequest, PackageRequest, ProjectDependency, RestoreRequest};
use tracing::{debug, warn};

use crate::loader::ProjectLoader;
use crate::paths::{normalize_path, relative_path};
use crate::types::{ProjectNode, ProjectStyle};

/// Closure load bound for small solutions.
pub const MIN_CLOSURE_TIMEOUT: Duration = Duration::from_secs(120);

/// The configured bound, or the minimum scaled by one tenth per two
/// projects past twenty.
pub fn closure_timeout(configured: Option<Duration>, project_count: usize) -> Duration {
    configured.unwrap_or_else(|| {
        let tiers = (project_count / 2).max(10);
        let tiers = u32::try_from(tiers).unwrap_or(u32::MAX);
        MIN_CLOSURE_TIMEOUT.saturating_mul(tiers) / 10
    })
}

#[derive(Debug, Clone, Copy)]
pub struct WalkOptions {
    /// Follow references past the entry projects' direct ones.
    pub recursive: bool,
    pub timeout: Option<Duration>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedProject {
    pub path: PathBuf,
    pub reason: String,
}

/// Every project reachable from the entry projects, loaded once.
#[derive(Debug, Clone, Default)]
pub struct ProjectClosure {
    nodes: BTreeMap<PathBuf, ProjectNode>,
    order: Vec<PathBuf>,
    entries: Vec<PathBuf>,
    skipped: Vec<SkippedProject>,
}

impl ProjectClosure {
    pub fn node(&self, path: &Path) -> Option<&ProjectNode> {
        self.nodes.get(&normalize_path(path))
    }

    /// Loaded projects, referenced projects before their referencers.
    pub fn projects(&self) -> impl Iterator<Item = &ProjectNode> {
        self.order.iter().filter_map(|path| self.nodes.get(path))
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn skipped(&self) -> &[SkippedProject] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Projects restored through the graph resolver.
    pub fn restorable(&self) -> impl Iterator<Item = &ProjectNode> {
        self.projects()
            .filter(|project| project.style.uses_assets_file())
    }

    pub fn packages_config_projects(&self) -> impl Iterator<Item = &ProjectNode> {
        self.projects()
            .filter(|project| project.style == ProjectStyle::PackagesConfig)
    }

    /// What the resolver needs for one restorable project, including the
    /// packages flowing in from its project references.
    pub fn restore_request(&self, path: &Path) -> Result<RestoreRequest> {
        let node = self
            .node(path)
            .ok_or_else(|| anyhow!("project '{}' is not part of the closure", path.display()))?;
        if !node.style.uses_assets_file() {
            bail!(
                "project '{}' uses {} restore and has no restore graph",
                node.path.display(),
                node.style.as_str()
            );
        }

        let mut request = RestoreRequest {
            frameworks: Vec::new(),
            runtime_identifiers: node.runtime_identifiers.clone(),
        };
        for entry in &node.frameworks {
            let mut framework = FrameworkRequest::new(entry.framework.clone());
            framework.fallbacks = entry.fallbacks.clone();
            framework.dependencies = node
                .dependencies_for(&entry.framework)
                .into_iter()
                .map(|reference| PackageRequest::new(reference.id.as_str(), reference.constraint.clone()))
                .collect();
            framework.projects = self.flowing_projects(node, &entry.framework);
            request.frameworks.push(framework);
        }
        Ok(request)
    }

    /// Projects reachable from `root` over flowing references, with the
    /// package references each one passes on. Non-restorable projects are
    /// passed through but contribute no packages.
    pub fn flowing_projects(&self, root: &ProjectNode, framework: &TargetFramework) -> Vec<ProjectDependency> {
        let mut seen = BTreeSet::new();
        let mut pending = root
            .references
            .iter()
            .filter(|reference| reference.flows)
            .map(|reference| reference.path.clone())
            .collect::<Vec<_>>();
        pending.reverse();

        let mut out = Vec::new();
        while let Some(path) = pending.pop() {
            if path == root.path || !seen.insert(path.clone()) {
                continue;
            }
            let Some(node) = self.nodes.get(&path) else {
                continue;
            };

            let dependencies = if node.style.uses_assets_file() {
                let candidates = node
                    .frameworks
                    .iter()
                    .map(|entry| entry.framework.clone())
                    .collect::<Vec<_>>();
                let references = match framework.get_nearest(&candidates) {
                    Some(nearest) => node.dependencies_for(nearest),
                    None => node.dependencies.iter().collect(),
                };
                references
                    .into_iter()
                    .filter(|reference| !reference.private_assets)
                    .map(|reference| PackageRequest::new(reference.id.as_str(), reference.constraint.clone()))
                    .collect()
            } else {
                Vec::new()
            };

            let flowing = node
                .references
                .iter()
                .filter(|reference| reference.flows)
                .collect::<Vec<_>>();
            let references = flowing
                .iter()
                .filter_map(|reference| self.nodes.get(&reference.path))
                .map(|referenced| referenced.name.clone())
                .collect();

            out.push(ProjectDependency {
                name: node.name.clone(),
                path: relative_path(root.directory(), &node.path),
                dependencies,
                references,
            });
            pending.extend(flowing.iter().rev().map(|reference| reference.path.clone()));
        }

        out.sort_by(|left, right| left.name.cmp(&right.name));
        out
    }
}

/// Loads the project reference closure of `entries`.
///
/// A project that fails to load is skipped with a warning. A reference to a
/// file that does not exist, a reference cycle, or running past the timeout
/// aborts the walk.
pub fn walk_projects(
    loader: &dyn ProjectLoader,
    entries: &[PathBuf],
    options: &WalkOptions,
) -> Result<ProjectClosure> {
    let timeout = closure_timeout(options.timeout, entries.len());
    let mut walker = Walker {
        loader,
        recursive: options.recursive,
        deadline: Instant::now() + timeout,
        timeout,
        stack: Vec::new(),
        closure: ProjectClosure::default(),
    };

    for entry in entries {
        let entry = normalize_path(entry);
        if !loader.exists(&entry) {
            bail!("project file does not exist: {}", entry.display());
        }
        if !walker.closure.entries.contains(&entry) {
            walker.closure.entries.push(entry.clone());
        }
        walker.visit(&entry, 0)?;
    }

    debug!(
        projects = walker.closure.nodes.len(),
        skipped = walker.closure.skipped.len(),
        "loaded project closure"
    );
    Ok(walker.closure)
}

struct Walker<'a> {
    loader: &'a dyn ProjectLoader,
    recursive: bool,
    deadline: Instant,
    timeout: Duration,
    stack: Vec<PathBuf>,
    closure: ProjectClosure,
}

impl Walker<'_> {
    fn visit(&mut self, path: &Path, depth: usize) -> Result<()> {
        if Instant::now() >= self.deadline {
            return Err(RestoreError::ProjectClosureTimeout {
                timeout: self.timeout,
            }
            .into());
        }
        if let Some(position) = self.stack.iter().position(|open| open == path) {
            let mut chain = self.stack[position..].to_vec();
            chain.push(path.to_path_buf());
            return Err(RestoreError::ProjectReferenceCycle { chain }.into());
        }
        if self.closure.nodes.contains_key(path)
            || self.closure.skipped.iter().any(|skipped| skipped.path == path)
        {
            return Ok(());
        }

        let node = match self.loader.load(path) {
            Ok(node) => node,
            Err(err) => {
                let failure = RestoreError::ProjectLoad {
                    path: path.to_path_buf(),
                    message: format!("{err:#}"),
                };
                warn!("{failure}; skipping it");
                self.closure.skipped.push(SkippedProject {
                    path: path.to_path_buf(),
                    reason: format!("{err:#}"),
                });
                return Ok(());
            }
        };

        for reference in &node.references {
            if !self.loader.exists(&reference.path) {
                return Err(RestoreError::MissingProjectReference {
                    project: path.to_path_buf(),
                    reference: reference.path.clone(),
                }
                .into());
            }
        }

        if self.recursive || depth == 0 {
            self.stack.push(path.to_path_buf());
            for reference in &node.references {
                self.visit(&reference.path, depth + 1)?;
            }
            self.stack.pop();
        }

        debug!(project = %path.display(), style = node.style.as_str(), "loaded project");
        self.closure.order.push(path.to_path_buf());
        self.closure.nodes.insert(path.to_path_buf(), node);
        Ok(())
    }
}
