//! In-memory fleet for tests and demos
//!
//! [`MemoryFleet`] is a [`Connector`] whose hosts keep their resources in a
//! shared map. Faults can be injected per key (probe or apply) and per host
//! (unreachable, inventory failure), and every mutation is journaled.

use crate::context::{Connector, RemoteHost};
use crate::diff::FieldChange;
use crate::error::{Error, Result};
use crate::model::{Host, Resource, ResourceKey, ResourceKind};
use crate::probe::{HostFacts, Observed, ProbeOutcome};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// A mutation carried out on a memory host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Create(ResourceKey),
    Update(ResourceKey, Vec<&'static str>),
    Delete(ResourceKey),
}

/// Error returned until `remaining` reaches zero (forever when `None`)
#[derive(Debug, Clone)]
struct Fault {
    error: Error,
    remaining: Option<u32>,
}

impl Fault {
    fn trigger(&mut self) -> Option<Error> {
        match &mut self.remaining {
            None => Some(self.error.clone()),
            Some(0) => None,
            Some(n) => {
                *n -= 1;
                Some(self.error.clone())
            }
        }
    }
}

#[derive(Debug)]
struct MemoryHost {
    reachable: bool,
    hyperv_installed: bool,
    resources: BTreeMap<ResourceKey, Observed>,
}

impl MemoryHost {
    fn new(hyperv_installed: bool) -> Self {
        Self {
            reachable: true,
            hyperv_installed,
            resources: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct FleetState {
    hosts: BTreeMap<String, MemoryHost>,
    probe_faults: BTreeMap<ResourceKey, Fault>,
    operation_faults: BTreeMap<ResourceKey, Fault>,
    inventory_faults: BTreeMap<String, Fault>,
    responses: BTreeMap<ResourceKey, Observed>,
    journal: Vec<JournalEntry>,
}

impl FleetState {
    fn host(&mut self, name: &str) -> Result<&mut MemoryHost> {
        match self.hosts.get_mut(name) {
            Some(host) if host.reachable => Ok(host),
            Some(_) => Err(unreachable(name, "host is down")),
            None => Err(unreachable(name, "no such host")),
        }
    }

    fn operation_fault(&mut self, key: &ResourceKey) -> Result<()> {
        match self.operation_faults.get_mut(key).and_then(Fault::trigger) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn unreachable(host: &str, message: &str) -> Error {
    Error::HostUnreachable {
        host: host.to_string(),
        message: message.to_string(),
    }
}

/// Shared in-memory fleet; clones see the same state
#[derive(Debug, Clone, Default)]
pub struct MemoryFleet {
    state: Arc<Mutex<FleetState>>,
}

impl MemoryFleet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FleetState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a reachable host with Hyper-V installed
    pub fn add_host(&self, name: &str) {
        self.lock()
            .hosts
            .insert(name.to_string(), MemoryHost::new(true));
    }

    /// Add a reachable host without the Hyper-V role
    pub fn add_host_without_hyperv(&self, name: &str) {
        self.lock()
            .hosts
            .insert(name.to_string(), MemoryHost::new(false));
    }

    pub fn set_unreachable(&self, host: &str, unreachable: bool) {
        if let Some(h) = self.lock().hosts.get_mut(host) {
            h.reachable = !unreachable;
        }
    }

    /// Put a resource on its host as if it had been created out of band
    pub fn insert(&self, resource: Resource) {
        let mut state = self.lock();
        let host = state
            .hosts
            .entry(resource.host_name().to_string())
            .or_insert_with(|| MemoryHost::new(true));
        if !matches!(resource, Resource::Host(_)) {
            host.resources
                .insert(resource.key(), Observed::from_declared(&resource));
        }
    }

    /// Current state of a resource
    pub fn get(&self, key: &ResourceKey) -> Option<Observed> {
        self.lock()
            .hosts
            .get(&key.host)
            .and_then(|h| h.resources.get(key).cloned())
    }

    /// Answer probes of `key` with `observed`, whatever is actually there
    pub fn respond_with(&self, key: &ResourceKey, observed: Observed) {
        self.lock().responses.insert(key.clone(), observed);
    }

    /// Fail every probe of `key`
    pub fn fail_probe(&self, key: &ResourceKey, error: Error) {
        self.lock().probe_faults.insert(
            key.clone(),
            Fault {
                error,
                remaining: None,
            },
        );
    }

    /// Fail the next `times` probes of `key`
    pub fn fail_probe_times(&self, key: &ResourceKey, error: Error, times: u32) {
        self.lock().probe_faults.insert(
            key.clone(),
            Fault {
                error,
                remaining: Some(times),
            },
        );
    }

    /// Fail every create, update or delete of `key`
    pub fn fail_operation(&self, key: &ResourceKey, error: Error) {
        self.lock().operation_faults.insert(
            key.clone(),
            Fault {
                error,
                remaining: None,
            },
        );
    }

    /// Fail every inventory request on `host`
    pub fn fail_inventory(&self, host: &str, error: Error) {
        self.lock().inventory_faults.insert(
            host.to_string(),
            Fault {
                error,
                remaining: None,
            },
        );
    }

    /// Mutations carried out so far, oldest first
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.lock().journal.clone()
    }
}

impl Connector for MemoryFleet {
    fn connect(&self, host: &Host) -> Result<Box<dyn RemoteHost>> {
        self.lock().host(&host.name)?;
        Ok(Box::new(MemoryRemote {
            host: host.name.clone(),
            fleet: self.clone(),
        }))
    }
}

/// Handle to one memory host
struct MemoryRemote {
    host: String,
    fleet: MemoryFleet,
}

impl RemoteHost for MemoryRemote {
    fn probe(&self, key: &ResourceKey) -> Result<ProbeOutcome> {
        let mut state = self.fleet.lock();
        state.host(&self.host)?;

        if let Some(e) = state.probe_faults.get_mut(key).and_then(Fault::trigger) {
            return Err(e);
        }
        if let Some(observed) = state.responses.get(key) {
            return Ok(ProbeOutcome::Observed(observed.clone()));
        }

        let host = state.host(&self.host)?;
        if key.kind == ResourceKind::Host {
            return Ok(ProbeOutcome::Observed(Observed::Host(HostFacts {
                hyperv_installed: host.hyperv_installed,
            })));
        }
        Ok(match host.resources.get(key) {
            Some(observed) => ProbeOutcome::Observed(observed.clone()),
            None => ProbeOutcome::Absent,
        })
    }

    fn inventory(&self, kind: ResourceKind) -> Result<Vec<ResourceKey>> {
        let mut state = self.fleet.lock();
        state.host(&self.host)?;
        if let Some(e) = state
            .inventory_faults
            .get_mut(&self.host)
            .and_then(Fault::trigger)
        {
            return Err(e);
        }
        let host = state.host(&self.host)?;
        Ok(host
            .resources
            .keys()
            .filter(|k| k.kind == kind)
            .cloned()
            .collect())
    }

    fn create(&self, resource: &Resource) -> Result<()> {
        let key = resource.key();
        let mut state = self.fleet.lock();
        state.host(&self.host)?;
        state.operation_fault(&key)?;

        let host = state.host(&self.host)?;
        if host.resources.contains_key(&key) {
            return Err(Error::InvalidOperation {
                key,
                message: "already exists".into(),
            });
        }
        host.resources
            .insert(key.clone(), Observed::from_declared(resource));
        state.journal.push(JournalEntry::Create(key));
        Ok(())
    }

    fn update(&self, resource: &Resource, changes: &[FieldChange]) -> Result<()> {
        let key = resource.key();
        let mut state = self.fleet.lock();
        state.host(&self.host)?;
        state.operation_fault(&key)?;

        let host = state.host(&self.host)?;
        if let Resource::Host(_) = resource {
            host.hyperv_installed = true;
        } else {
            let Some(current) = host.resources.get_mut(&key) else {
                return Err(Error::InvalidOperation {
                    key,
                    message: "does not exist".into(),
                });
            };
            *current = Observed::from_declared(resource);
        }
        state.journal.push(JournalEntry::Update(
            key,
            changes.iter().map(|c| c.field).collect(),
        ));
        Ok(())
    }

    fn delete(&self, key: &ResourceKey) -> Result<()> {
        let mut state = self.fleet.lock();
        state.host(&self.host)?;
        state.operation_fault(key)?;

        let host = state.host(&self.host)?;
        if host.resources.remove(key).is_none() {
            return Err(Error::InvalidOperation {
                key: key.clone(),
                message: "does not exist".into(),
            });
        }
        state.journal.push(JournalEntry::Delete(key.clone()));
        Ok(())
    }
}
