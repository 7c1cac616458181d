//! Provider traits and run context
//!
//! These traits let the engine reconcile a fleet without depending on how a
//! host is reached or how progress is shown. The Hyper-V implementation lives
//! in its own crate; an in-memory one for tests sits behind the `testing`
//! feature.

use crate::diff::{FieldChange, Operation};
use crate::error::Result;
use crate::model::{Host, Resource, ResourceKey, ResourceKind};
use crate::probe::ProbeOutcome;
use crate::report::Outcome;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Remote management channel to one host.
///
/// A handle is used by a single host stream at a time, so implementations
/// never see concurrent calls.
pub trait RemoteHost: Send {
    /// Read the current state of one resource. Must not change anything.
    fn probe(&self, key: &ResourceKey) -> Result<ProbeOutcome>;

    /// List the keys of every resource of `kind` that exists on the host
    fn inventory(&self, kind: ResourceKind) -> Result<Vec<ResourceKey>>;

    /// Create a resource as declared
    fn create(&self, resource: &Resource) -> Result<()>;

    /// Change the given mutable fields in place
    fn update(&self, resource: &Resource, changes: &[FieldChange]) -> Result<()>;

    /// Remove a resource
    fn delete(&self, key: &ResourceKey) -> Result<()>;
}

/// Opens remote handles from a host's connection descriptor
pub trait Connector: Send + Sync {
    fn connect(&self, host: &Host) -> Result<Box<dyn RemoteHost>>;
}

/// Progress callback for reconciliation
///
/// Called from host streams running in parallel, so methods take `&self`.
pub trait ProgressCallback: Send + Sync {
    /// Called when a host stream starts, with the number of declared entities
    fn on_host_start(&self, host: &str, count: usize);

    /// Called before an operation is carried out on an entity
    fn on_resource_start(&self, key: &ResourceKey, operation: &Operation);

    /// Called when an entity has its final outcome
    fn on_resource_complete(&self, key: &ResourceKey, outcome: &Outcome);

    /// Called when a host stream (orphans included) is finished
    fn on_host_complete(&self, host: &str);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_host_start(&self, _host: &str, _count: usize) {}
    fn on_resource_start(&self, _key: &ResourceKey, _operation: &Operation) {}
    fn on_resource_complete(&self, _key: &ResourceKey, _outcome: &Outcome) {}
    fn on_host_complete(&self, _host: &str) {}
}

/// Run-level cancellation flag.
///
/// Once set, no new operation is started; operations already in flight run
/// to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
