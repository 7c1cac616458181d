//! Diff engine - declared vs. observed state per resource
//!
//! Each field is either mutable (changed in place by an update) or
//! structural (fixed at creation, so a change forces delete + create).
//! Optional declared settings left unset are not compared.

use crate::error::{Error, Result};
use crate::model::{Host, PathStyle, Resource, ResourceKey, Switch, SwitchKind, Vhd, Vm};
use crate::probe::{HostFacts, Observed, ProbeOutcome};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Field names used in change sets.
pub mod fields {
    pub const HYPERV_ROLE: &str = "hyperv_role";

    pub const TYPE: &str = "type";
    pub const ADAPTER: &str = "adapter";
    pub const ALLOW_MANAGEMENT_OS: &str = "allow_management_os";
    pub const ENABLE_IOV: &str = "enable_iov";
    pub const BANDWIDTH_MODE: &str = "bandwidth_mode";

    pub const SIZE: &str = "size";

    pub const PATH: &str = "path";
    pub const GENERATION: &str = "generation";
    pub const CPU_COUNT: &str = "cpu_count";
    pub const MEMORY_STARTUP: &str = "memory.startup";
    pub const MEMORY_DYNAMIC: &str = "memory.dynamic";
    pub const MEMORY_MINIMUM: &str = "memory.minimum";
    pub const MEMORY_MAXIMUM: &str = "memory.maximum";
    pub const VHDS: &str = "vhds";
    pub const SWITCHES: &str = "switches";
    pub const BOOT_ISO: &str = "boot_iso";
    pub const BOOT_DEVICE: &str = "boot_device";
    pub const AUTOMATIC_START_ACTION: &str = "automatic_start_action";
    pub const AUTOMATIC_START_DELAY: &str = "automatic_start_delay";
    pub const AUTOMATIC_STOP_ACTION: &str = "automatic_stop_action";
    pub const SECURE_BOOT: &str = "secure_boot";
    pub const SECURE_BOOT_TEMPLATE: &str = "secure_boot_template";
}

/// One field that differs, rendered for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub field: &'static str,
    /// Observed value
    pub from: String,
    /// Declared value
    pub to: String,
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.field, self.from, self.to)
    }
}

/// Operation required to converge one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Observed state matches
    NoOp,
    /// Absent on the host
    Create,
    /// Mutable fields diverge
    Update { fields: Vec<FieldChange> },
    /// A structural field diverges; `fields` lists every difference
    Replace { fields: Vec<FieldChange> },
    /// Undeclared and pruning is enabled
    Delete,
    /// Undeclared, reported only
    Orphaned,
}

impl Operation {
    /// Whether carrying this out changes the host
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Create | Self::Update { .. } | Self::Replace { .. } | Self::Delete
        )
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::NoOp => "=",
            Self::Create => "+",
            Self::Update { .. } => "~",
            Self::Replace { .. } => "-/+",
            Self::Delete => "-",
            Self::Orphaned => "?",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NoOp => "no-op",
            Self::Create => "create",
            Self::Update { .. } => "update",
            Self::Replace { .. } => "replace",
            Self::Delete => "delete",
            Self::Orphaned => "orphaned",
        }
    }

    /// Changed fields, for updates and replacements
    pub fn fields(&self) -> &[FieldChange] {
        match self {
            Self::Update { fields } | Self::Replace { fields } => fields,
            _ => &[],
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Accumulates differences, split into structural and mutable
#[derive(Default)]
struct Changes {
    structural: Vec<FieldChange>,
    mutable: Vec<FieldChange>,
}

impl Changes {
    fn check_mutable<T: PartialEq + fmt::Display>(&mut self, field: &'static str, observed: T, declared: T) {
        if observed != declared {
            self.mutable.push(change(field, observed, declared));
        }
    }

    fn check_structural<T: PartialEq + fmt::Display>(
        &mut self,
        field: &'static str,
        observed: T,
        declared: T,
    ) {
        if observed != declared {
            self.structural.push(change(field, observed, declared));
        }
    }

    fn into_operation(self) -> Operation {
        if !self.structural.is_empty() {
            let mut fields = self.structural;
            fields.extend(self.mutable);
            Operation::Replace { fields }
        } else if !self.mutable.is_empty() {
            Operation::Update {
                fields: self.mutable,
            }
        } else {
            Operation::NoOp
        }
    }
}

fn change(field: &'static str, from: impl fmt::Display, to: impl fmt::Display) -> FieldChange {
    FieldChange {
        field,
        from: from.to_string(),
        to: to.to_string(),
    }
}

/// Display adapter for optional values
struct Opt<'a, T>(&'a Option<T>);

impl<T: fmt::Display> fmt::Display for Opt<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => v.fmt(f),
            None => f.write_str("none"),
        }
    }
}

impl<T: PartialEq> PartialEq for Opt<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

/// Display adapter for lists
struct List<'a>(&'a [String]);

impl fmt::Display for List<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// Compute the operation that converges `declared` given what the host reported.
/// Paths compare under the host's `style`.
pub fn diff(declared: &Resource, observed: &ProbeOutcome, style: PathStyle) -> Result<Operation> {
    let key = declared.key();
    let observed = match observed {
        ProbeOutcome::Absent => {
            return match declared {
                Resource::Host(_) => Err(Error::ProbeParse {
                    key,
                    message: "host reported no facts about itself".into(),
                }),
                _ => Ok(Operation::Create),
            };
        }
        ProbeOutcome::Observed(observed) => observed,
    };

    let op = match (declared, observed) {
        (Resource::Host(host), Observed::Host(facts)) => return diff_host(&key, host, facts),
        (Resource::Switch(d), Observed::Switch(o)) => diff_switch(d, o),
        (Resource::Vhd(d), Observed::Vhd(o)) => diff_vhd(d, o),
        (Resource::Vm(d), Observed::Vm(o)) => diff_vm(d, o, style),
        (_, other) => {
            return Err(Error::ProbeParse {
                key,
                message: format!("declared a {}, observed a {}", declared.kind(), other.kind()),
            });
        }
    };
    Ok(op.into_operation())
}

/// Operation for a resource found on a host but not declared
pub fn diff_orphan(prune: bool) -> Operation {
    if prune {
        Operation::Delete
    } else {
        Operation::Orphaned
    }
}

fn diff_host(key: &ResourceKey, host: &Host, facts: &HostFacts) -> Result<Operation> {
    if facts.hyperv_installed {
        return Ok(Operation::NoOp);
    }
    if !host.install {
        return Err(Error::InvalidOperation {
            key: key.clone(),
            message: "Hyper-V is not installed and install is false".into(),
        });
    }
    Ok(Operation::Update {
        fields: vec![change(fields::HYPERV_ROLE, "absent", "installed")],
    })
}

fn diff_switch(declared: &Switch, observed: &Switch) -> Changes {
    let mut changes = Changes::default();
    changes.check_structural(fields::TYPE, observed.kind.label(), declared.kind.label());

    if let (
        SwitchKind::External {
            adapter,
            allow_management_os,
            enable_iov,
            bandwidth_mode,
        },
        SwitchKind::External {
            adapter: observed_adapter,
            allow_management_os: observed_management,
            enable_iov: observed_iov,
            bandwidth_mode: observed_bandwidth,
        },
    ) = (&declared.kind, &observed.kind)
    {
        // Bandwidth mode and SR-IOV are fixed when the switch is created
        if let Some(mode) = bandwidth_mode {
            changes.check_structural(fields::BANDWIDTH_MODE, Opt(observed_bandwidth), Opt(&Some(*mode)));
        }
        if let Some(iov) = enable_iov {
            changes.check_structural(fields::ENABLE_IOV, Opt(observed_iov), Opt(&Some(*iov)));
        }
        changes.check_mutable(fields::ADAPTER, observed_adapter, adapter);
        if let Some(allow) = allow_management_os {
            changes.check_mutable(
                fields::ALLOW_MANAGEMENT_OS,
                Opt(observed_management),
                Opt(&Some(*allow)),
            );
        }
    }
    changes
}

fn diff_vhd(declared: &Vhd, observed: &Vhd) -> Changes {
    let mut changes = Changes::default();
    changes.check_structural(fields::TYPE, observed.disk_type, declared.disk_type);
    changes.check_mutable(fields::SIZE, observed.size, declared.size);
    changes
}

fn same_paths(style: PathStyle, a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(a, b)| style.same_path(a, b))
}

fn same_optional_path(style: PathStyle, a: &Option<String>, b: &Option<String>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => style.same_path(a, b),
        (a, b) => a.is_none() && b.is_none(),
    }
}

fn diff_vm(declared: &Vm, observed: &Vm, style: PathStyle) -> Changes {
    let mut changes = Changes::default();

    if declared.path.is_some() && !same_optional_path(style, &observed.path, &declared.path) {
        changes
            .structural
            .push(change(fields::PATH, Opt(&observed.path), Opt(&declared.path)));
    }
    changes.check_structural(fields::GENERATION, observed.generation, declared.generation);

    changes.check_mutable(fields::CPU_COUNT, observed.cpu_count, declared.cpu_count);

    let (dm, om) = (&declared.memory, &observed.memory);
    changes.check_mutable(fields::MEMORY_STARTUP, om.startup, dm.startup);
    changes.check_mutable(fields::MEMORY_DYNAMIC, om.dynamic, dm.dynamic);
    if dm.dynamic {
        changes.check_mutable(fields::MEMORY_MINIMUM, om.minimum(), dm.minimum());
        changes.check_mutable(fields::MEMORY_MAXIMUM, om.maximum(), dm.maximum());
    }

    // Disk order is controller slot order; switch order carries no meaning.
    if !same_paths(style, &observed.vhds, &declared.vhds) {
        changes
            .mutable
            .push(change(fields::VHDS, List(&observed.vhds), List(&declared.vhds)));
    }
    let observed_switches: BTreeSet<&String> = observed.switches.iter().collect();
    let declared_switches: BTreeSet<&String> = declared.switches.iter().collect();
    if observed_switches != declared_switches {
        changes
            .mutable
            .push(change(fields::SWITCHES, List(&observed.switches), List(&declared.switches)));
    }

    if !same_optional_path(style, &observed.boot_iso, &declared.boot_iso) {
        changes
            .mutable
            .push(change(fields::BOOT_ISO, Opt(&observed.boot_iso), Opt(&declared.boot_iso)));
    }
    // Generation 2 firmware only boots from devices the VM actually has
    if declared.generation == 1 || declared.has_boot_target() {
        changes.check_mutable(fields::BOOT_DEVICE, observed.boot_device, declared.boot_device);
    }
    changes.check_mutable(
        fields::AUTOMATIC_START_ACTION,
        observed.automatic_start_action,
        declared.automatic_start_action,
    );
    changes.check_mutable(
        fields::AUTOMATIC_START_DELAY,
        observed.automatic_start_delay,
        declared.automatic_start_delay,
    );
    changes.check_mutable(
        fields::AUTOMATIC_STOP_ACTION,
        observed.automatic_stop_action,
        declared.automatic_stop_action,
    );

    if declared.generation == 2 {
        changes.check_mutable(
            fields::SECURE_BOOT,
            observed.secure_boot_enabled(),
            declared.secure_boot_enabled(),
        );
        if declared.secure_boot_template.is_some() {
            changes.check_mutable(
                fields::SECURE_BOOT_TEMPLATE,
                Opt(&observed.secure_boot_template),
                Opt(&declared.secure_boot_template),
            );
        }
    }
    changes
}
