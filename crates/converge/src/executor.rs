//! Execution engine - one serialized operation stream per host
//!
//! A stream walks its host's entities in resolver order: probe, diff, apply.
//! Failures are contained by scope. A failed or unconfirmed entity skips
//! everything that depends on it, and a host-scoped failure skips the rest
//! of the stream. Once the declared entities are done, the host is searched
//! for undeclared resources.

use crate::context::{CancelToken, Connector, ProgressCallback, RemoteHost};
use crate::diff::{self, Operation};
use crate::error::{Error, Result, Scope};
use crate::graph::ResourceGraph;
use crate::model::{Host, PathStyle, Resource, ResourceKey, ResourceKind};
use crate::observed::ObservedState;
use crate::probe::{self, Observed, ProbeOutcome};
use crate::reconcile::ReconcileOptions;
use crate::report::{EntityReport, Outcome, SkipCause};
use crate::retry::{LogCallback, with_retry};
use std::collections::BTreeMap;

/// Kinds searched for undeclared resources, in deletion order
const ORPHAN_KINDS: [ResourceKind; 3] = [ResourceKind::Vm, ResourceKind::Vhd, ResourceKind::Switch];

/// What one host stream produced
pub(crate) struct StreamResult {
    pub entries: Vec<EntityReport>,
    pub warnings: Vec<String>,
    /// Whether the host answered its probe
    pub reached: bool,
}

pub(crate) struct HostStream<'a> {
    pub graph: &'a ResourceGraph,
    pub host: &'a Host,
    pub keys: &'a [ResourceKey],
    pub connector: &'a dyn Connector,
    pub options: &'a ReconcileOptions,
    pub observed: &'a ObservedState,
    pub progress: &'a dyn ProgressCallback,
    pub cancel: &'a CancelToken,
}

/// Mutable state of a running stream
#[derive(Default)]
struct StreamState {
    remote: Option<Box<dyn RemoteHost>>,
    outcomes: BTreeMap<ResourceKey, Outcome>,
    /// Entity whose failure ended the stream
    host_failure: Option<ResourceKey>,
}

impl HostStream<'_> {
    pub fn run(self) -> StreamResult {
        let host = &self.host.name;
        self.progress.on_host_start(host, self.keys.len());
        log::debug!("reconciling {} entities on {host}", self.keys.len());

        let mut state = StreamState::default();
        let mut entries = Vec::with_capacity(self.keys.len());

        for key in self.keys {
            let outcome = self.process(key, &mut state);
            self.progress.on_resource_complete(key, &outcome);
            state.outcomes.insert(key.clone(), outcome.clone());
            entries.push(EntityReport {
                key: key.clone(),
                outcome,
                orphan: false,
            });
        }

        let reached = self.observed.get(&self.host.key()).is_some();
        let host_converged = state
            .outcomes
            .get(&self.host.key())
            .is_some_and(Outcome::is_success);

        let mut warnings = Vec::new();
        if host_converged && state.host_failure.is_none() && !self.cancel.is_cancelled() {
            if let Some(remote) = state.remote.as_deref() {
                self.orphans(remote, &mut entries, &mut warnings);
            }
        }

        self.progress.on_host_complete(host);
        StreamResult {
            entries,
            warnings,
            reached,
        }
    }

    fn process(&self, key: &ResourceKey, state: &mut StreamState) -> Outcome {
        if self.cancel.is_cancelled() {
            return Outcome::Skipped {
                cause: SkipCause::Cancelled,
            };
        }
        if let Some(root) = &state.host_failure {
            return Outcome::skipped_by(root);
        }
        if let Some(ancestor) = self.blocked_by(key, &state.outcomes) {
            log::info!("skipping {key}: depends on {ancestor}");
            return Outcome::skipped_by(&ancestor);
        }
        let Some(resource) = self.graph.get(key) else {
            return Outcome::failed(&Error::Internal(format!("{key} is not in the graph")));
        };

        match self.converge(key, resource, state) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("{key}: {e}");
                if matches!(e.scope(), Scope::Host | Scope::Run) {
                    state.host_failure = Some(key.clone());
                }
                Outcome::failed(&e)
            }
        }
    }

    /// Root cause that prevents `key` from being attempted, if any
    fn blocked_by(
        &self,
        key: &ResourceKey,
        outcomes: &BTreeMap<ResourceKey, Outcome>,
    ) -> Option<ResourceKey> {
        for dep in self.graph.dependencies(key) {
            match outcomes.get(&dep) {
                Some(Outcome::Skipped {
                    cause: SkipCause::Dependency { ancestor },
                }) => return Some(ancestor.clone()),
                Some(Outcome::Failed { .. } | Outcome::Skipped { .. }) | None => return Some(dep),
                Some(_) if !self.observed.is_present(&dep) => return Some(dep),
                Some(_) => {}
            }
        }
        None
    }

    fn converge(
        &self,
        key: &ResourceKey,
        resource: &Resource,
        state: &mut StreamState,
    ) -> Result<Outcome> {
        if state.remote.is_none() {
            let remote = self.retry(&format!("connect to {}", self.host.address()), || {
                self.connector.connect(self.host)
            })?;
            state.remote = Some(remote);
        }
        let remote = state
            .remote
            .as_deref()
            .ok_or_else(|| Error::Internal(format!("no connection to {}", self.host.name)))?;

        let observed = self.retry(&format!("probe {key}"), || probe::probe(remote, key))?;
        self.observed.record(key, observed.clone());

        let operation = diff::diff(resource, &observed, self.host.path_style)?;
        if operation == Operation::NoOp {
            return Ok(Outcome::NoOp);
        }

        if self.options.dry_run {
            // Dependents plan as if this had been applied
            self.observed
                .record_present(key, Observed::from_declared(resource));
            return Ok(Outcome::Planned { operation });
        }

        self.progress.on_resource_start(key, &operation);
        self.apply(remote, key, resource, &operation)?;
        self.observed
            .record_present(key, Observed::from_declared(resource));
        log::info!("{} {key}", operation.label());
        Ok(Outcome::applied(&operation))
    }

    fn apply(
        &self,
        remote: &dyn RemoteHost,
        key: &ResourceKey,
        resource: &Resource,
        operation: &Operation,
    ) -> Result<()> {
        match operation {
            Operation::NoOp | Operation::Orphaned => Ok(()),
            Operation::Create => self.retry(&format!("create {key}"), || remote.create(resource)),
            Operation::Update { fields } => {
                self.retry(&format!("update {key}"), || remote.update(resource, fields))
            }
            Operation::Replace { .. } => {
                self.retry(&format!("delete {key}"), || remote.delete(key))?;
                let after = self.retry(&format!("probe {key}"), || probe::probe(remote, key))?;
                if after.is_present() {
                    return Err(Error::InvalidOperation {
                        key: key.clone(),
                        message: "still present after delete, not recreating".into(),
                    });
                }
                self.observed.record(key, ProbeOutcome::Absent);
                self.retry(&format!("create {key}"), || remote.create(resource))
            }
            Operation::Delete => self.retry(&format!("delete {key}"), || remote.delete(key)),
        }
    }

    /// Find undeclared resources and delete or report them
    fn orphans(
        &self,
        remote: &dyn RemoteHost,
        entries: &mut Vec<EntityReport>,
        warnings: &mut Vec<String>,
    ) {
        let host = &self.host.name;
        // A VM that could not be deleted may still hold disks and switch ports.
        let mut halted: Option<ResourceKey> = None;

        for kind in ORPHAN_KINDS {
            let listed = self.retry(&format!("list {kind} resources on {host}"), || {
                probe::inventory(remote, host, kind)
            });
            let keys = match listed {
                Ok(keys) => keys,
                Err(e) => {
                    log::warn!("could not list {kind} resources on {host}: {e}");
                    warnings.push(format!("could not list {kind} resources on {host}: {e}"));
                    continue;
                }
            };

            for key in keys.into_iter().filter(|k| !self.is_declared(k)) {
                log::warn!("found undeclared {key}");
                let operation = diff::diff_orphan(self.options.prune);

                let outcome = if operation != Operation::Delete {
                    Outcome::Orphaned
                } else if self.options.dry_run {
                    Outcome::Planned { operation }
                } else if self.cancel.is_cancelled() {
                    Outcome::Skipped {
                        cause: SkipCause::Cancelled,
                    }
                } else if let Some(root) = &halted {
                    Outcome::skipped_by(root)
                } else {
                    self.progress.on_resource_start(&key, &operation);
                    match self.retry(&format!("delete {key}"), || remote.delete(&key)) {
                        Ok(()) => {
                            log::info!("deleted undeclared {key}");
                            self.observed.record(&key, ProbeOutcome::Absent);
                            Outcome::Deleted
                        }
                        Err(e) => {
                            log::error!("{key}: {e}");
                            if kind == ResourceKind::Vm || e.scope() == Scope::Host {
                                halted = Some(key.clone());
                            }
                            Outcome::failed(&e)
                        }
                    }
                };

                self.progress.on_resource_complete(&key, &outcome);
                entries.push(EntityReport {
                    key,
                    outcome,
                    orphan: true,
                });
            }
        }
    }

    /// Windows hosts compare names and paths case-insensitively
    fn is_declared(&self, key: &ResourceKey) -> bool {
        self.graph.contains(key)
            || (self.host.path_style == PathStyle::Windows
                && self.graph.of_kind(key.kind).any(|r| {
                    r.host_name() == key.host && r.key().name.eq_ignore_ascii_case(&key.name)
                }))
    }

    fn retry<T>(&self, action: &str, operation: impl FnMut() -> Result<T>) -> Result<T> {
        let callback = LogCallback { action };
        with_retry(&self.options.retry, Some(&callback), Some(self.cancel), operation)
    }
}
