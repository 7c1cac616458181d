//! Resource graph - validated, immutable set of declared resources
//!
//! A graph is built once from declarations. Construction fails if two
//! declarations share a key, if a reference points at an undeclared key, or
//! if a field breaks its invariant. After that the graph is read-only.

use crate::error::{Error, Result};
use crate::model::{Host, PathStyle, Resource, ResourceKey, ResourceKind};
use std::collections::{BTreeMap, BTreeSet};

/// Validated set of declared resources, keyed by unique key.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    resources: BTreeMap<ResourceKey, Resource>,
    dependents: BTreeMap<ResourceKey, BTreeSet<ResourceKey>>,
}

impl ResourceGraph {
    /// Build a graph from declarations
    ///
    /// Checks run in order: duplicate keys, dangling references, field
    /// invariants. The first failure is returned.
    pub fn build(declarations: impl IntoIterator<Item = Resource>) -> Result<Self> {
        let mut resources = BTreeMap::new();
        for resource in declarations {
            let key = resource.key();
            if resources.contains_key(&key) {
                return Err(Error::DuplicateKey { key });
            }
            resources.insert(key, resource);
        }

        let mut dependents: BTreeMap<ResourceKey, BTreeSet<ResourceKey>> = BTreeMap::new();
        for (key, resource) in &resources {
            for reference in resource.references() {
                if !resources.contains_key(&reference) {
                    return Err(Error::DanglingReference {
                        from: key.clone(),
                        to: reference,
                    });
                }
                dependents
                    .entry(reference)
                    .or_default()
                    .insert(key.clone());
            }
        }

        for resource in resources.values() {
            let style = match resources.get(&ResourceKey::host(resource.host_name())) {
                Some(Resource::Host(host)) => host.path_style,
                _ => PathStyle::default(),
            };
            resource.validate(style)?;
        }

        log::debug!("built resource graph with {} resources", resources.len());

        Ok(Self {
            resources,
            dependents,
        })
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.resources.contains_key(key)
    }

    /// Resolve a key to its declared resource
    pub fn get(&self, key: &ResourceKey) -> Option<&Resource> {
        self.resources.get(key)
    }

    /// All resources in key order
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    /// All resources of one kind, in key order
    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &Resource> {
        self.resources.values().filter(move |r| r.kind() == kind)
    }

    /// All declared hosts, in name order
    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.resources.values().filter_map(|r| match r {
            Resource::Host(h) => Some(h),
            _ => None,
        })
    }

    pub fn host(&self, name: &str) -> Option<&Host> {
        match self.resources.get(&ResourceKey::host(name)) {
            Some(Resource::Host(h)) => Some(h),
            _ => None,
        }
    }

    /// Direct references of a resource (what it depends on), without duplicates
    pub fn dependencies(&self, key: &ResourceKey) -> Vec<ResourceKey> {
        let mut seen = BTreeSet::new();
        self.resources
            .get(key)
            .map(Resource::references)
            .unwrap_or_default()
            .into_iter()
            .filter(|k| seen.insert(k.clone()))
            .collect()
    }

    /// Direct dependents of a resource (what references it)
    pub fn dependents(&self, key: &ResourceKey) -> impl Iterator<Item = &ResourceKey> {
        self.dependents.get(key).into_iter().flatten()
    }

    /// The branch rooted at `key`: the key plus everything depending on it transitively
    pub fn branch(&self, key: &ResourceKey) -> BTreeSet<ResourceKey> {
        let mut branch = BTreeSet::new();
        let mut stack = vec![key.clone()];
        while let Some(current) = stack.pop() {
            if branch.insert(current.clone()) {
                stack.extend(self.dependents(&current).cloned());
            }
        }
        branch
    }
}
