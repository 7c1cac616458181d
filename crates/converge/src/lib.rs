//! # Converge
//!
//! A desired-state reconciliation engine for virtualization hosts.
//!
//! This crate takes a graph of declared resources (hosts, virtual switches,
//! virtual hard disks and VMs), probes what actually exists on each host, and
//! drives every host toward the declaration, safely, incrementally and
//! idempotently.
//!
//! ## Core Concepts
//!
//! - **ResourceGraph**: validated, immutable set of declarations and their references
//! - **Resolver**: deterministic apply order, referenced resources first
//! - **Prober**: read-only queries returning `Observed` or `Absent`
//! - **Diff**: `Create`, `Update`, `Replace`, `Delete`, `Orphaned` or `NoOp` per resource
//! - **Executor**: one serialized stream per host, with retry and failure containment
//! - **RunReport**: outcome of every entity, summary counts and exit status
//!
//! ## Example
//!
//! ```ignore
//! use converge::{
//!     Capacity, Host, ReconcileOptions, ResourceGraph, Switch, SwitchKind, Vhd,
//!     memory::MemoryFleet, reconcile_simple,
//! };
//!
//! let graph = ResourceGraph::build(vec![
//!     Host::new("hv01").into(),
//!     Switch::new("hv01", "LAN", SwitchKind::Internal).into(),
//!     Vhd::new("hv01", r"D:\VMs\web.vhdx", Capacity::gib(40)).into(),
//! ])?;
//!
//! let fleet = MemoryFleet::new();
//! fleet.add_host("hv01");
//!
//! let report = reconcile_simple(&graph, &fleet, &ReconcileOptions::default())?;
//! assert_eq!(report.summary.created, 2);
//! ```
//!
//! ## Provider Traits
//!
//! - [`Connector`]: opens a [`RemoteHost`] from a host's connection descriptor
//! - [`RemoteHost`]: probe, inventory, create, update and delete on one host
//! - [`ProgressCallback`]: receives per-host and per-entity progress
//!
//! The engine never knows how a host is reached; see the `hyperv` crate for
//! the PowerShell implementation.

pub mod capacity;
pub mod context;
pub mod diff;
pub mod error;
mod executor;
pub mod graph;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod model;
pub mod observed;
pub mod probe;
pub mod reconcile;
pub mod report;
pub mod resolver;
pub mod retry;

// Re-export main types at crate root
pub use capacity::{Capacity, parse_capacity};
pub use context::{CancelToken, Connector, NoProgress, ProgressCallback, RemoteHost};
pub use diff::{FieldChange, Operation, diff, diff_orphan};
pub use error::{Error, ErrorCategory, Result, Scope};
pub use graph::ResourceGraph;
pub use model::{
    BandwidthMode, BootDevice, DiskType, Host, MemoryPolicy, PathStyle, Resource, ResourceKey,
    ResourceKind, StartAction, StopAction, Switch, SwitchKind, Vhd, Vm,
};
pub use observed::ObservedState;
pub use probe::{HostFacts, Observed, ProbeOutcome};
pub use reconcile::{ReconcileOptions, reconcile, reconcile_simple};
pub use report::{EntityReport, Outcome, RunReport, RunStatus, RunSummary, SkipCause};
pub use resolver::{apply_order, partition_by_host};
pub use retry::RetryConfig;
