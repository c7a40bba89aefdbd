use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use packrestore_cache::{InstalledPackage, SelectedPackage};
use packrestore_core::{PackageDependency, PackageId, PackageVersion, RestoreError, VersionConstraint};
use tracing::{debug, warn};

use crate::provider::PackageProvider;
use crate::types::FrameworkRequest;
use crate::validation::check_min_client_version;

/// A package chosen for one framework.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedNode {
    pub(crate) installed: InstalledPackage,
    pub(crate) dependencies: Vec<PackageDependency>,
}

#[derive(Debug, Default)]
pub(crate) struct FrameworkWalk {
    pub(crate) nodes: Vec<ResolvedNode>,
    pub(crate) warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Pending,
    Accepted,
    /// A request for the same id sits closer to the project on this path.
    Eclipsed,
}

#[derive(Debug)]
struct GraphNode {
    /// `None` for the restoring project and for referenced projects.
    package: Option<(PackageId, VersionConstraint)>,
    label: String,
    parent: Option<usize>,
    children: Vec<usize>,
    depth: usize,
    state: NodeState,
    /// What this request would pick on its own.
    own: Option<SelectedPackage>,
    /// Key of the installed package the node was expanded with.
    installed_key: Option<String>,
}

impl GraphNode {
    fn frame(label: impl Into<String>, parent: Option<usize>, depth: usize) -> Self {
        Self {
            package: None,
            label: label.into(),
            parent,
            children: Vec::new(),
            depth,
            state: NodeState::Accepted,
            own: None,
            installed_key: None,
        }
    }

    fn package(id: PackageId, constraint: VersionConstraint, parent: usize, depth: usize) -> Self {
        Self {
            label: id.to_string(),
            package: Some((id, constraint)),
            parent: Some(parent),
            children: Vec::new(),
            depth,
            state: NodeState::Pending,
            own: None,
            installed_key: None,
        }
    }

    fn id(&self) -> Option<&PackageId> {
        self.package.as_ref().map(|(id, _)| id)
    }
}

/// Version decided for each package id, lowercase keyed.
type Pins = HashMap<String, SelectedPackage>;

struct GraphWalker<'a> {
    provider: &'a dyn PackageProvider,
    request: &'a FrameworkRequest,
    parallel: bool,
    selections: HashMap<(String, String), SelectedPackage>,
    installed: HashMap<String, InstalledPackage>,
}

/// Transitive walk for one framework.
///
/// On any path from the project, the request nearest to the project wins:
/// a package is eclipsed when an ancestor or a sibling of an ancestor asks
/// for the same id, so direct references always win. Requests that survive
/// on unrelated branches are cousins and all take the highest version any
/// of them selects. Raising a cousin can change the dependencies below it,
/// so the walk repeats until the chosen versions stop moving.
pub(crate) fn walk_framework(
    provider: &dyn PackageProvider,
    request: &FrameworkRequest,
    parallel: bool,
) -> Result<FrameworkWalk> {
    let mut walker = GraphWalker {
        provider,
        request,
        parallel,
        selections: HashMap::new(),
        installed: HashMap::new(),
    };

    let mut pins = Pins::new();
    let mut round = 1usize;
    loop {
        let nodes = walker.build(&pins)?;
        let (raised, settled) = raise_cousins(&nodes, &pins);
        if settled {
            debug!(round, framework = %request.framework, "dependency graph settled");
            return walker.finish(&nodes);
        }
        // Pins only ever move up, so the rounds terminate.
        pins = raised;
        round += 1;
    }
}

impl GraphWalker<'_> {
    fn select(&mut self, id: &PackageId, constraint: &VersionConstraint) -> Result<SelectedPackage> {
        let key = (id.to_lower(), constraint.to_string());
        if let Some(selected) = self.selections.get(&key) {
            return Ok(selected.clone());
        }
        let selected = self
            .provider
            .select(id, constraint)?
            .ok_or_else(|| RestoreError::VersionNotFound {
                id: id.to_string(),
                requested: constraint.to_string(),
            })?;
        self.selections.insert(key, selected.clone());
        Ok(selected)
    }

    /// Builds the request tree, expanding accepted nodes with the pinned
    /// version of their id when one exists.
    fn build(&mut self, pins: &Pins) -> Result<Vec<GraphNode>> {
        let mut nodes = vec![GraphNode::frame("", None, 0)];
        let mut wave = Vec::new();
        for dependency in &self.request.dependencies {
            wave.push(push_child(
                &mut nodes,
                0,
                GraphNode::package(dependency.id.clone(), dependency.constraint.clone(), 0, 1),
            ));
        }
        for project in &self.request.projects {
            let frame = push_child(&mut nodes, 0, GraphNode::frame(project.name.clone(), Some(0), 1));
            for dependency in &project.dependencies {
                wave.push(push_child(
                    &mut nodes,
                    frame,
                    GraphNode::package(dependency.id.clone(), dependency.constraint.clone(), frame, 2),
                ));
            }
        }

        while !wave.is_empty() {
            let mut to_load: Vec<SelectedPackage> = Vec::new();
            let mut accepted = Vec::new();
            for index in wave.drain(..) {
                check_cycle(&nodes, index)?;
                if is_eclipsed(&nodes, index) {
                    nodes[index].state = NodeState::Eclipsed;
                    continue;
                }
                let Some((id, constraint)) = nodes[index].package.clone() else {
                    continue;
                };
                let own = self.select(&id, &constraint)?;
                let used = pins.get(&id.to_lower()).cloned().unwrap_or_else(|| own.clone());
                let key = installed_key(&used);
                if !self.installed.contains_key(&key)
                    && !to_load.iter().any(|pending| installed_key(pending) == key)
                {
                    to_load.push(used);
                }
                let node = &mut nodes[index];
                node.state = NodeState::Accepted;
                node.own = Some(own);
                node.installed_key = Some(key);
                accepted.push(index);
            }

            for (selected, installed) in to_load.iter().zip(load_all(self.provider, &to_load, self.parallel)?) {
                self.installed.insert(installed_key(selected), installed);
            }

            for index in accepted {
                let Some(installed) = nodes[index]
                    .installed_key
                    .as_ref()
                    .and_then(|key| self.installed.get(key))
                else {
                    continue;
                };
                let dependencies = installed
                    .manifest
                    .dependencies_for(&self.request.framework, &self.request.fallbacks)
                    .to_vec();
                let depth = nodes[index].depth + 1;
                for dependency in dependencies {
                    wave.push(push_child(
                        &mut nodes,
                        index,
                        GraphNode::package(dependency.id, dependency.constraint, index, depth),
                    ));
                }
            }
        }

        Ok(nodes)
    }

    fn finish(&self, nodes: &[GraphNode]) -> Result<FrameworkWalk> {
        let mut walk = FrameworkWalk::default();
        let mut chosen: BTreeMap<String, (PackageVersion, usize)> = BTreeMap::new();

        for node in nodes.iter().filter(|node| node.state == NodeState::Accepted) {
            let (Some(id), Some(key)) = (node.id(), node.installed_key.as_ref()) else {
                continue;
            };
            if chosen.contains_key(&id.to_lower()) {
                continue;
            }
            let installed = self
                .installed
                .get(key)
                .with_context(|| format!("package '{key}' was selected but never installed"))?;
            check_min_client_version(&installed.manifest)?;
            chosen.insert(id.to_lower(), (installed.identity.version.clone(), node.depth));
            walk.nodes.push(ResolvedNode {
                dependencies: installed
                    .manifest
                    .dependencies_for(&self.request.framework, &self.request.fallbacks)
                    .to_vec(),
                installed: installed.clone(),
            });
        }

        for (index, node) in nodes.iter().enumerate() {
            let Some((id, constraint)) = &node.package else {
                continue;
            };
            if node.state == NodeState::Pending {
                continue;
            }
            let Some((version, depth)) = chosen.get(&id.to_lower()) else {
                continue;
            };
            if let Some(warning) = conflict_warning(nodes, index, id, constraint, version, *depth) {
                warn!("{warning}");
                walk.warnings.push(warning);
            }
        }

        Ok(walk)
    }
}

fn push_child(nodes: &mut Vec<GraphNode>, parent: usize, node: GraphNode) -> usize {
    let index = nodes.len();
    nodes.push(node);
    nodes[parent].children.push(index);
    index
}

fn installed_key(selected: &SelectedPackage) -> String {
    format!(
        "{}/{}",
        selected.identity.id.to_lower(),
        selected.identity.version.to_normalized_string().to_ascii_lowercase()
    )
}

/// Pins every accepted id to the highest version any of its requests picks
/// on its own. Settled when every accepted node already used that version.
fn raise_cousins(nodes: &[GraphNode], pins: &Pins) -> (Pins, bool) {
    let mut raised = pins.clone();
    for node in nodes.iter().filter(|node| node.state == NodeState::Accepted) {
        let (Some(id), Some(candidate)) = (node.id(), node.own.as_ref()) else {
            continue;
        };
        let higher = raised
            .get(&id.to_lower())
            .is_none_or(|current| candidate.identity.version > current.identity.version);
        if higher {
            raised.insert(id.to_lower(), candidate.clone());
        }
    }

    let settled = nodes
        .iter()
        .filter(|node| node.state == NodeState::Accepted)
        .all(|node| match (node.id(), node.installed_key.as_ref()) {
            (Some(id), Some(key)) => raised
                .get(&id.to_lower())
                .is_some_and(|pin| installed_key(pin) == *key),
            _ => true,
        });
    (raised, settled)
}

/// Ancestors of `index`, nearest first.
fn ancestors(nodes: &[GraphNode], index: usize) -> impl Iterator<Item = usize> + '_ {
    std::iter::successors(nodes[index].parent, move |current| nodes[*current].parent)
}

fn check_cycle(nodes: &[GraphNode], index: usize) -> Result<()> {
    let Some(id) = nodes[index].id() else {
        return Ok(());
    };
    let chain = ancestors(nodes, index).collect::<Vec<_>>();
    let Some(position) = chain.iter().position(|ancestor| nodes[*ancestor].id() == Some(id)) else {
        return Ok(());
    };
    let mut ids = chain[..=position]
        .iter()
        .rev()
        .map(|ancestor| nodes[*ancestor].label.clone())
        .collect::<Vec<_>>();
    ids.push(id.to_string());
    Err(RestoreError::DependencyCycle { ids }.into())
}

fn is_eclipsed(nodes: &[GraphNode], index: usize) -> bool {
    let Some(id) = nodes[index].id() else {
        return false;
    };
    let mut current = index;
    while let Some(parent) = nodes[current].parent {
        if let Some(grandparent) = nodes[parent].parent {
            let eclipsed = nodes[grandparent]
                .children
                .iter()
                .any(|sibling| *sibling != parent && nodes[*sibling].id() == Some(id));
            if eclipsed {
                return true;
            }
        }
        current = parent;
    }
    false
}

fn load_all(
    provider: &dyn PackageProvider,
    selections: &[SelectedPackage],
    parallel: bool,
) -> Result<Vec<InstalledPackage>> {
    let load = |selected: &SelectedPackage| {
        provider
            .load(selected)
            .with_context(|| format!("failed to install package '{}'", selected.identity))
    };
    if !parallel || selections.len() < 2 {
        return selections.iter().map(load).collect();
    }

    std::thread::scope(|scope| {
        let handles = selections
            .iter()
            .map(|selected| scope.spawn(move || load(selected)))
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("package install thread panicked")))
            })
            .collect()
    })
}

/// Warning for a request the chosen version does not satisfy.
fn conflict_warning(
    nodes: &[GraphNode],
    index: usize,
    id: &PackageId,
    constraint: &VersionConstraint,
    chosen: &PackageVersion,
    chosen_depth: usize,
) -> Option<String> {
    if constraint.satisfies(chosen) {
        return None;
    }
    let mut path = ancestors(nodes, index)
        .map(|ancestor| nodes[ancestor].label.clone())
        .filter(|label| !label.is_empty())
        .collect::<Vec<_>>();
    path.reverse();
    path.push(format!("{id} ({constraint})"));
    let path = path.join(" -> ");

    let below_minimum = constraint.min_version().is_some_and(|min| chosen < min);
    if below_minimum {
        Some(format!(
            "Detected package downgrade: {id} from {constraint} to {chosen} (requested by {path}, chosen at depth {chosen_depth}). Reference the package directly from the project to select a different version."
        ))
    } else {
        Some(format!("{path} requires {id} ({constraint}) but version {chosen} was resolved"))
    }
}
