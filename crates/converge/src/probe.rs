//! State prober - read-only queries of a host's current state
//!
//! The prober never changes remote state and never retries; retrying is the
//! executor's decision. Responses are sanity-checked against the key that was
//! asked for, and anything that does not line up is reported as a
//! [`Error::ProbeParse`] rather than silently treated as absent.

use crate::context::RemoteHost;
use crate::error::{Error, Result};
use crate::model::{Resource, ResourceKey, ResourceKind, Switch, Vhd, Vm};

/// Facts observed about a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostFacts {
    /// Whether the hypervisor role is installed and enabled
    pub hyperv_installed: bool,
}

/// Current attributes of an existing resource, as reported by its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    Host(HostFacts),
    Switch(Switch),
    Vhd(Vhd),
    Vm(Vm),
}

impl Observed {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Host(_) => ResourceKind::Host,
            Self::Switch(_) => ResourceKind::Switch,
            Self::Vhd(_) => ResourceKind::Vhd,
            Self::Vm(_) => ResourceKind::Vm,
        }
    }

    /// What a host reports after a declared resource has been applied
    pub fn from_declared(resource: &Resource) -> Self {
        match resource {
            Resource::Host(_) => Self::Host(HostFacts {
                hyperv_installed: true,
            }),
            Resource::Switch(s) => Self::Switch(s.clone()),
            Resource::Vhd(v) => Self::Vhd(v.clone()),
            Resource::Vm(v) => Self::Vm(v.clone()),
        }
    }

    /// Name the host reported, when the kind carries one
    fn reported_name(&self) -> Option<&str> {
        match self {
            Self::Host(_) => None,
            Self::Switch(s) => Some(&s.name),
            Self::Vhd(v) => Some(&v.path),
            Self::Vm(v) => Some(&v.name),
        }
    }
}

/// Result of probing one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Observed(Observed),
    Absent,
}

impl ProbeOutcome {
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Observed(_))
    }
}

/// Probe one key on its host
pub fn probe(remote: &dyn RemoteHost, key: &ResourceKey) -> Result<ProbeOutcome> {
    log::debug!("probing {key}");
    let outcome = remote.probe(key)?;

    match &outcome {
        ProbeOutcome::Absent if key.kind == ResourceKind::Host => Err(Error::ProbeParse {
            key: key.clone(),
            message: "host reported no facts about itself".into(),
        }),
        ProbeOutcome::Observed(observed) if observed.kind() != key.kind => {
            Err(Error::ProbeParse {
                key: key.clone(),
                message: format!("expected a {}, host described a {}", key.kind, observed.kind()),
            })
        }
        ProbeOutcome::Observed(observed) => match observed.reported_name() {
            Some(name) if !name.eq_ignore_ascii_case(&key.name) => Err(Error::ProbeParse {
                key: key.clone(),
                message: format!("host described '{name}' instead"),
            }),
            _ => Ok(outcome),
        },
        ProbeOutcome::Absent => Ok(outcome),
    }
}

/// List the keys of one kind that exist on a host
pub fn inventory(
    remote: &dyn RemoteHost,
    host: &str,
    kind: ResourceKind,
) -> Result<Vec<ResourceKey>> {
    log::debug!("listing {kind} resources on {host}");
    let mut keys = remote.inventory(kind)?;

    if let Some(stray) = keys.iter().find(|k| k.kind != kind || k.host != host) {
        return Err(Error::ProbeParse {
            key: stray.clone(),
            message: format!("listed while enumerating {kind} resources on {host}"),
        });
    }

    keys.sort();
    keys.dedup();
    Ok(keys)
}
