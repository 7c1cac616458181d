//! Dependency resolver - deterministic apply order for a resource graph
//!
//! Resources are ordered so every resource comes after everything it
//! references. Among resources that are ready at the same time the smallest
//! key wins (kind first, then host, then name), so the same graph always
//! yields the same order.

use crate::error::{Error, Result};
use crate::graph::ResourceGraph;
use crate::model::ResourceKey;
use std::collections::{BTreeMap, BTreeSet};

/// Topologically order the graph, referenced resources first
pub fn apply_order(graph: &ResourceGraph) -> Result<Vec<ResourceKey>> {
    let edges: BTreeMap<ResourceKey, Vec<ResourceKey>> = graph
        .iter()
        .map(|r| (r.key(), graph.dependencies(&r.key())))
        .collect();

    topological_order(&edges).map_err(|cycle| Error::CyclicDependency { cycle })
}

/// Split an apply order into per-host streams, keeping relative order
pub fn partition_by_host(order: &[ResourceKey]) -> BTreeMap<String, Vec<ResourceKey>> {
    let mut streams: BTreeMap<String, Vec<ResourceKey>> = BTreeMap::new();
    for key in order {
        streams.entry(key.host.clone()).or_default().push(key.clone());
    }
    streams
}

/// Kahn's algorithm over `node -> dependencies`, smallest ready node first.
///
/// Dependencies that are not themselves nodes are ignored. On a cycle,
/// returns one cycle as a closed path (first node repeated at the end).
pub(crate) fn topological_order<K: Ord + Clone>(
    deps: &BTreeMap<K, Vec<K>>,
) -> std::result::Result<Vec<K>, Vec<K>> {
    let mut in_degree: BTreeMap<&K, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&K, Vec<&K>> = BTreeMap::new();

    for (node, node_deps) in deps {
        let unique: BTreeSet<&K> = node_deps.iter().filter(|d| deps.contains_key(*d)).collect();
        in_degree.insert(node, unique.len());
        for dep in unique {
            dependents.entry(dep).or_default().push(node);
        }
    }

    let mut ready: BTreeSet<&K> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(node, _)| *node)
        .collect();
    let mut order = Vec::with_capacity(deps.len());

    while let Some(node) = ready.pop_first() {
        order.push(node.clone());
        for &dependent in dependents.get(node).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if order.len() == deps.len() {
        return Ok(order);
    }

    let remaining: BTreeSet<&K> = in_degree
        .iter()
        .filter(|(_, degree)| **degree > 0)
        .map(|(node, _)| *node)
        .collect();
    Err(find_cycle(deps, &remaining))
}

/// Walk unresolved nodes until one repeats
fn find_cycle<K: Ord + Clone>(deps: &BTreeMap<K, Vec<K>>, remaining: &BTreeSet<&K>) -> Vec<K> {
    let Some(start) = remaining.first() else {
        return Vec::new();
    };

    let mut path: Vec<&K> = Vec::new();
    let mut current = *start;
    loop {
        if let Some(pos) = path.iter().position(|k| *k == current) {
            let mut cycle: Vec<K> = path[pos..].iter().map(|k| (*k).clone()).collect();
            cycle.push(current.clone());
            return cycle;
        }
        path.push(current);

        // Every unresolved node has at least one unresolved dependency.
        let next = deps
            .get(current)
            .into_iter()
            .flatten()
            .find(|d| remaining.contains(d));
        match next {
            Some(dep) => current = dep,
            None => return path.into_iter().cloned().collect(),
        }
    }
}
