use std::collections::{BTreeMap, BTreeSet, HashSet};

use packrestore_core::RestoreError;

use crate::types::TargetLibrary;

/// Dependency-first order of `libraries` (indices into the slice). Among
/// libraries with no ordering constraint between them the lower
/// case-insensitive name comes first.
pub(crate) fn dependency_first_order(libraries: &[TargetLibrary]) -> Result<Vec<usize>, RestoreError> {
    let index_by_name: BTreeMap<String, usize> = libraries
        .iter()
        .enumerate()
        .map(|(index, library)| (library.name.to_ascii_lowercase(), index))
        .collect();

    let mut reverse: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    for name in index_by_name.keys() {
        reverse.insert(name, BTreeSet::new());
        in_degree.insert(name, 0);
    }

    for (name, index) in &index_by_name {
        let mut deps = BTreeSet::new();
        for dependency in libraries[*index].dependencies.keys() {
            let lower = dependency.to_ascii_lowercase();
            if let Some((dep_name, _)) = index_by_name.get_key_value(&lower) {
                deps.insert(dep_name.as_str());
            }
        }
        in_degree.insert(name, deps.len());
        for dep_name in deps {
            reverse.entry(dep_name).or_default().insert(name);
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter_map(|(name, degree)| (*degree == 0).then_some(*name))
        .collect();
    let mut ordered = Vec::with_capacity(libraries.len());

    while let Some(next) = ready.pop_first() {
        ordered.push(index_by_name[next]);
        if let Some(dependents) = reverse.get(next) {
            for dependent in dependents {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }
    }

    if ordered.len() != index_by_name.len() {
        let ordered_set: HashSet<usize> = ordered.iter().copied().collect();
        let mut ids = index_by_name
            .values()
            .filter(|index| !ordered_set.contains(index))
            .map(|index| libraries[*index].name.clone())
            .collect::<Vec<_>>();
        ids.sort_by_key(|name| name.to_ascii_lowercase());
        return Err(RestoreError::DependencyCycle { ids });
    }

    Ok(ordered)
}
