//! Per-run cache of observed state
//!
//! Partitioned by host with one lock per partition. Each partition is written
//! only by the stream reconciling that host, so streams never contend.

use crate::model::ResourceKey;
use crate::probe::{Observed, ProbeOutcome};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct ObservedState {
    partitions: BTreeMap<String, Mutex<BTreeMap<ResourceKey, ProbeOutcome>>>,
}

impl ObservedState {
    /// Create a cache with one empty partition per host
    pub fn new<'a>(hosts: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            partitions: hosts
                .into_iter()
                .map(|h| (h.to_string(), Mutex::new(BTreeMap::new())))
                .collect(),
        }
    }

    fn partition(&self, host: &str) -> Option<MutexGuard<'_, BTreeMap<ResourceKey, ProbeOutcome>>> {
        self.partitions
            .get(host)
            .map(|m| m.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    /// Record what is known about a key. Keys of undeclared hosts are ignored.
    pub fn record(&self, key: &ResourceKey, outcome: ProbeOutcome) {
        match self.partition(&key.host) {
            Some(mut partition) => {
                partition.insert(key.clone(), outcome);
            }
            None => log::debug!("ignoring observation of {key}: host has no partition"),
        }
    }

    /// Record a key as present with the given state
    pub fn record_present(&self, key: &ResourceKey, observed: Observed) {
        self.record(key, ProbeOutcome::Observed(observed));
    }

    pub fn get(&self, key: &ResourceKey) -> Option<ProbeOutcome> {
        self.partition(&key.host)?.get(key).cloned()
    }

    /// Whether the key is known to exist
    pub fn is_present(&self, key: &ResourceKey) -> bool {
        self.get(key).is_some_and(|o| o.is_present())
    }

    /// Copy of one host's partition
    pub fn snapshot(&self, host: &str) -> BTreeMap<ResourceKey, ProbeOutcome> {
        self.partition(host).map(|p| p.clone()).unwrap_or_default()
    }
}
