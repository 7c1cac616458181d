//! Reconciliation loop - resolve, then run every host stream in parallel

use crate::context::{CancelToken, Connector, NoProgress, ProgressCallback};
use crate::error::{Error, Result};
use crate::executor::{HostStream, StreamResult};
use crate::graph::ResourceGraph;
use crate::model::ResourceKey;
use crate::observed::ObservedState;
use crate::report::RunReport;
use crate::resolver::{apply_order, partition_by_host};
use crate::retry::RetryConfig;
use chrono::Utc;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Options for a reconciliation run
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Delete undeclared resources instead of reporting them
    pub prune: bool,
    /// Probe and diff only
    pub dry_run: bool,
    /// Number of host streams run in parallel
    pub jobs: usize,
    pub retry: RetryConfig,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            prune: false,
            dry_run: false,
            jobs: 4,
            retry: RetryConfig::default(),
        }
    }
}

/// Reconcile every host in the graph
///
/// Resolution errors abort before any host is contacted. After that, every
/// entity gets an outcome in the report; failures never abort the run.
pub fn reconcile(
    graph: &ResourceGraph,
    connector: &dyn Connector,
    options: &ReconcileOptions,
    progress: &dyn ProgressCallback,
    cancel: &CancelToken,
) -> Result<RunReport> {
    let started_at = Utc::now();
    let order = apply_order(graph)?;
    let streams = partition_by_host(&order);
    let observed = ObservedState::new(streams.keys().map(String::as_str));

    log::info!(
        "reconciling {} resources on {} hosts{}",
        order.len(),
        streams.len(),
        if options.dry_run { " (dry run)" } else { "" }
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.jobs.max(1))
        .build()
        .map_err(|e| Error::Internal(format!("failed to create thread pool: {e}")))?;

    let results: Vec<StreamResult> = pool.install(|| {
        streams
            .par_iter()
            .filter_map(|(host, keys)| {
                let host = graph.host(host)?;
                let stream = HostStream {
                    graph,
                    host,
                    keys,
                    connector,
                    options,
                    observed: &observed,
                    progress,
                    cancel,
                };
                Some(stream.run())
            })
            .collect()
    });

    let hosts_reached = results.iter().filter(|r| r.reached).count();
    let position: BTreeMap<&ResourceKey, usize> =
        order.iter().enumerate().map(|(i, k)| (k, i)).collect();

    let mut declared = Vec::with_capacity(order.len());
    let mut orphans = Vec::new();
    let mut warnings = Vec::new();
    for result in results {
        for entry in result.entries {
            if entry.orphan {
                orphans.push(entry);
            } else {
                declared.push(entry);
            }
        }
        warnings.extend(result.warnings);
    }
    declared.sort_by_key(|e| position.get(&e.key).copied().unwrap_or(usize::MAX));
    orphans.sort_by(|a, b| a.key.cmp(&b.key));
    declared.extend(orphans);

    Ok(RunReport::new(
        started_at,
        options.dry_run,
        declared,
        warnings,
        hosts_reached,
        streams.len(),
    ))
}

/// Reconcile without progress reporting or cancellation
pub fn reconcile_simple(
    graph: &ResourceGraph,
    connector: &dyn Connector,
    options: &ReconcileOptions,
) -> Result<RunReport> {
    reconcile(graph, connector, options, &NoProgress, &CancelToken::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::Capacity;
    use crate::diff::{FieldChange, Operation, fields};
    use crate::error::ErrorCategory;
    use crate::memory::{JournalEntry, MemoryFleet};
    use crate::model::{DiskType, Host, PathStyle, Resource, Switch, SwitchKind, Vhd, Vm};
    use crate::probe::Observed;
    use crate::report::{Outcome, RunStatus, SkipCause};
    use std::sync::Mutex;
    use std::time::Duration;

    fn options() -> ReconcileOptions {
        ReconcileOptions {
            retry: RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                backoff_factor: 1.0,
                max_delay: Duration::from_millis(5),
            },
            ..Default::default()
        }
    }

    fn host(name: &str) -> Resource {
        Host::new(name).with_path_style(PathStyle::Posix).into()
    }

    fn vm(host: &str, name: &str, vhds: &[&str], switches: &[&str]) -> Vm {
        let mut vm = Vm::new(host, name);
        vm.vhds = vhds.iter().map(|s| s.to_string()).collect();
        vm.switches = switches.iter().map(|s| s.to_string()).collect();
        vm
    }

    /// Host H, switch S, disk V and VM A using both
    fn scenario(cpu_count: u32) -> ResourceGraph {
        let mut a = vm("h", "a", &["/vms/a.vhdx"], &["s"]);
        a.cpu_count = cpu_count;
        ResourceGraph::build(vec![
            host("h"),
            Switch::new("h", "s", SwitchKind::Internal).into(),
            Vhd::new("h", "/vms/a.vhdx", Capacity::gib(10)).into(),
            a.into(),
        ])
        .unwrap()
    }

    fn s() -> ResourceKey {
        ResourceKey::switch("h", "s")
    }

    fn v() -> ResourceKey {
        ResourceKey::vhd("h", "/vms/a.vhdx")
    }

    fn a() -> ResourceKey {
        ResourceKey::vm("h", "a")
    }

    #[test]
    fn test_first_run_creates_in_order_then_idempotent() {
        let fleet = MemoryFleet::new();
        fleet.add_host("h");
        let graph = scenario(2);

        let first = reconcile_simple(&graph, &fleet, &options()).unwrap();
        assert_eq!(first.status, RunStatus::Success);
        assert_eq!(first.summary.created, 3);
        assert_eq!(first.summary.no_op, 1);
        assert_eq!(
            fleet.journal(),
            vec![
                JournalEntry::Create(s()),
                JournalEntry::Create(v()),
                JournalEntry::Create(a()),
            ]
        );

        let second = reconcile_simple(&graph, &fleet, &options()).unwrap();
        assert_eq!(second.summary.no_op, 4);
        assert_eq!(second.summary.total_changes(), 0);
        assert_eq!(fleet.journal().len(), 3);
    }

    #[test]
    fn test_entries_follow_apply_order() {
        let fleet = MemoryFleet::new();
        fleet.add_host("h");
        let report = reconcile_simple(&scenario(1), &fleet, &options()).unwrap();
        let keys: Vec<_> = report.entries.iter().map(|e| e.key.clone()).collect();
        assert_eq!(keys, vec![ResourceKey::host("h"), s(), v(), a()]);
    }

    #[test]
    fn test_cpu_change_updates_only_the_vm() {
        let fleet = MemoryFleet::new();
        fleet.add_host("h");
        reconcile_simple(&scenario(2), &fleet, &options()).unwrap();

        let report = reconcile_simple(&scenario(4), &fleet, &options()).unwrap();
        assert_eq!(
            report.outcome(&a()),
            Some(&Outcome::Updated {
                fields: vec![FieldChange {
                    field: fields::CPU_COUNT,
                    from: "2".into(),
                    to: "4".into(),
                }]
            })
        );
        assert_eq!(report.outcome(&s()), Some(&Outcome::NoOp));
        assert_eq!(report.outcome(&v()), Some(&Outcome::NoOp));
        assert_eq!(report.summary.updated, 1);
        assert_eq!(report.summary.created, 0);
        assert_eq!(report.summary.deleted, 0);
    }

    #[test]
    fn test_unreachable_probe_skips_dependents_only() {
        let fleet = MemoryFleet::new();
        fleet.add_host("h");
        fleet.add_host("other");
        fleet.fail_probe(
            &v(),
            Error::HostUnreachable {
                host: "h".into(),
                message: "connection reset".into(),
            },
        );

        let mut decls: Vec<Resource> = vec![
            host("h"),
            Switch::new("h", "s", SwitchKind::Internal).into(),
            Vhd::new("h", "/vms/a.vhdx", Capacity::gib(10)).into(),
            vm("h", "a", &["/vms/a.vhdx"], &["s"]).into(),
            host("other"),
        ];
        decls.push(vm("other", "b", &[], &[]).into());
        let graph = ResourceGraph::build(decls).unwrap();

        let report = reconcile_simple(&graph, &fleet, &options()).unwrap();
        assert!(matches!(report.outcome(&v()), Some(Outcome::Failed { .. })));
        assert_eq!(
            report.outcome(&a()),
            Some(&Outcome::Skipped {
                cause: SkipCause::Dependency { ancestor: v() }
            })
        );
        assert_eq!(report.outcome(&s()), Some(&Outcome::Created));
        assert_eq!(
            report.outcome(&ResourceKey::vm("other", "b")),
            Some(&Outcome::Created)
        );
        assert_eq!(report.status, RunStatus::PartialFailure);
        assert_eq!(report.exit_code(), 2);
    }

    #[test]
    fn test_transient_failure_recovered_by_retry() {
        let fleet = MemoryFleet::new();
        fleet.add_host("h");
        fleet.fail_probe_times(
            &v(),
            Error::HostUnreachable {
                host: "h".into(),
                message: "timeout".into(),
            },
            2,
        );

        let report = reconcile_simple(&scenario(1), &fleet, &options()).unwrap();
        assert_eq!(report.outcome(&v()), Some(&Outcome::Created));
        assert_eq!(report.status, RunStatus::Success);
    }

    #[test]
    fn test_permission_denied_skips_rest_of_host() {
        let fleet = MemoryFleet::new();
        fleet.add_host("h");
        fleet.fail_operation(
            &s(),
            Error::Permission {
                host: "h".into(),
                message: "access is denied".into(),
            },
        );
        let mut graph_decls = vec![
            host("h"),
            Switch::new("h", "s", SwitchKind::Internal).into(),
            Vhd::new("h", "/vms/a.vhdx", Capacity::gib(10)).into(),
        ];
        graph_decls.push(vm("h", "solo", &[], &[]).into());
        let graph = ResourceGraph::build(graph_decls).unwrap();

        let report = reconcile_simple(&graph, &fleet, &options()).unwrap();
        assert!(matches!(report.outcome(&s()), Some(Outcome::Failed { .. })));
        // Independent of the switch, but on the same host
        assert_eq!(report.outcome(&v()), Some(&Outcome::skipped_by(&s())));
        assert_eq!(
            report.outcome(&ResourceKey::vm("h", "solo")),
            Some(&Outcome::skipped_by(&s()))
        );
    }

    #[test]
    fn test_probe_parse_failure_is_contained_to_entity() {
        let fleet = MemoryFleet::new();
        fleet.add_host("h");
        fleet.fail_probe(
            &s(),
            Error::ProbeParse {
                key: s(),
                message: "unexpected token".into(),
            },
        );

        let report = reconcile_simple(&scenario(1), &fleet, &options()).unwrap();
        assert!(matches!(report.outcome(&s()), Some(Outcome::Failed { .. })));
        assert_eq!(report.outcome(&v()), Some(&Outcome::Created));
        // Never treated as absent
        assert!(!fleet.journal().contains(&JournalEntry::Create(s())));
        assert_eq!(report.outcome(&a()), Some(&Outcome::skipped_by(&s())));
    }

    #[test]
    fn test_unreachable_host_is_fatal_when_alone() {
        let fleet = MemoryFleet::new();
        fleet.add_host("h");
        fleet.set_unreachable("h", true);

        let report = reconcile_simple(&scenario(1), &fleet, &options()).unwrap();
        assert_eq!(report.status, RunStatus::Fatal);
        assert_eq!(report.exit_code(), 3);
        assert!(matches!(
            report.outcome(&ResourceKey::host("h")),
            Some(Outcome::Failed { .. })
        ));
        assert_eq!(
            report.outcome(&a()),
            Some(&Outcome::skipped_by(&ResourceKey::host("h")))
        );
    }

    #[test]
    fn test_vhd_path_change_with_prune() {
        let fleet = MemoryFleet::new();
        fleet.add_host("h");
        reconcile_simple(&scenario(1), &fleet, &options()).unwrap();

        let moved = ResourceGraph::build(vec![
            host("h"),
            Switch::new("h", "s", SwitchKind::Internal).into(),
            Vhd::new("h", "/vms/b.vhdx", Capacity::gib(10)).into(),
            vm("h", "a", &["/vms/b.vhdx"], &["s"]).into(),
        ])
        .unwrap();
        let prune = ReconcileOptions {
            prune: true,
            ..options()
        };

        let report = reconcile_simple(&moved, &fleet, &prune).unwrap();
        let new_disk = ResourceKey::vhd("h", "/vms/b.vhdx");
        assert_eq!(report.outcome(&new_disk), Some(&Outcome::Created));
        assert!(matches!(report.outcome(&a()), Some(Outcome::Updated { .. })));
        assert_eq!(report.outcome(&v()), Some(&Outcome::Deleted));
        assert!(report.entries.last().is_some_and(|e| e.orphan));
        assert!(fleet.get(&v()).is_none());
    }

    #[test]
    fn test_orphans_reported_without_prune() {
        let fleet = MemoryFleet::new();
        fleet.add_host("h");
        fleet.insert(Switch::new("h", "legacy", SwitchKind::Private).into());

        let report = reconcile_simple(&scenario(1), &fleet, &options()).unwrap();
        let legacy = ResourceKey::switch("h", "legacy");
        assert_eq!(report.outcome(&legacy), Some(&Outcome::Orphaned));
        assert_eq!(report.summary.orphaned, 1);
        assert_eq!(report.status, RunStatus::Success);
        assert!(fleet.get(&legacy).is_some());
    }

    #[test]
    fn test_failed_orphan_vm_deletion_halts_orphan_cleanup() {
        let fleet = MemoryFleet::new();
        fleet.add_host("h");
        let stale_vm = ResourceKey::vm("h", "stale");
        let stale_disk = ResourceKey::vhd("h", "/vms/stale.vhdx");
        fleet.insert(Vm::new("h", "stale").into());
        fleet.insert(Vhd::new("h", "/vms/stale.vhdx", Capacity::gib(1)).into());
        fleet.fail_operation(
            &stale_vm,
            Error::InvalidOperation {
                key: stale_vm.clone(),
                message: "VM is running".into(),
            },
        );
        let prune = ReconcileOptions {
            prune: true,
            ..options()
        };

        let report = reconcile_simple(&scenario(1), &fleet, &prune).unwrap();
        assert!(matches!(
            report.outcome(&stale_vm),
            Some(Outcome::Failed { .. })
        ));
        assert_eq!(
            report.outcome(&stale_disk),
            Some(&Outcome::skipped_by(&stale_vm))
        );
        assert!(fleet.get(&stale_disk).is_some());
    }

    #[test]
    fn test_structural_change_replaces() {
        let fleet = MemoryFleet::new();
        fleet.add_host("h");
        reconcile_simple(&scenario(1), &fleet, &options()).unwrap();

        let mut vhd = Vhd::new("h", "/vms/a.vhdx", Capacity::gib(10));
        vhd.disk_type = DiskType::Fixed;
        let graph = ResourceGraph::build(vec![
            host("h"),
            Switch::new("h", "s", SwitchKind::Internal).into(),
            vhd.into(),
            vm("h", "a", &["/vms/a.vhdx"], &["s"]).into(),
        ])
        .unwrap();

        let report = reconcile_simple(&graph, &fleet, &options()).unwrap();
        assert!(matches!(report.outcome(&v()), Some(Outcome::Replaced { .. })));
        assert_eq!(report.summary.created, 1);
        assert_eq!(report.summary.deleted, 1);

        let journal = fleet.journal();
        let tail = &journal[journal.len() - 2..];
        assert_eq!(tail, &[JournalEntry::Delete(v()), JournalEntry::Create(v())]);
    }

    /// The scenario with its disk switched to fixed, which forces a replace
    fn fixed_disk_scenario() -> ResourceGraph {
        let mut vhd = Vhd::new("h", "/vms/a.vhdx", Capacity::gib(10));
        vhd.disk_type = DiskType::Fixed;
        ResourceGraph::build(vec![
            host("h"),
            Switch::new("h", "s", SwitchKind::Internal).into(),
            vhd.into(),
            vm("h", "a", &["/vms/a.vhdx"], &["s"]).into(),
        ])
        .unwrap()
    }

    #[test]
    fn test_replace_not_recreated_when_delete_fails() {
        let fleet = MemoryFleet::new();
        fleet.add_host("h");
        reconcile_simple(&scenario(1), &fleet, &options()).unwrap();
        fleet.fail_operation(
            &v(),
            Error::InvalidOperation {
                key: v(),
                message: "disk is attached to a running VM".into(),
            },
        );

        let report = reconcile_simple(&fixed_disk_scenario(), &fleet, &options()).unwrap();
        assert!(matches!(report.outcome(&v()), Some(Outcome::Failed { .. })));
        assert_eq!(report.outcome(&a()), Some(&Outcome::skipped_by(&v())));
        assert_eq!(fleet.journal().len(), 3);
        assert!(matches!(
            fleet.get(&v()),
            Some(Observed::Vhd(Vhd {
                disk_type: DiskType::Dynamic,
                ..
            }))
        ));
    }

    #[test]
    fn test_replace_not_recreated_while_still_present() {
        let fleet = MemoryFleet::new();
        fleet.add_host("h");
        reconcile_simple(&scenario(1), &fleet, &options()).unwrap();
        // Host keeps reporting the old disk after deleting it
        fleet.respond_with(
            &v(),
            Observed::Vhd(Vhd::new("h", "/vms/a.vhdx", Capacity::gib(10))),
        );

        let report = reconcile_simple(&fixed_disk_scenario(), &fleet, &options()).unwrap();
        assert!(matches!(
            report.outcome(&v()),
            Some(Outcome::Failed {
                category: ErrorCategory::InvalidOperation,
                ..
            })
        ));
        assert_eq!(report.outcome(&a()), Some(&Outcome::skipped_by(&v())));

        let journal = fleet.journal();
        assert_eq!(journal.last(), Some(&JournalEntry::Delete(v())));
        assert!(!journal[3..].contains(&JournalEntry::Create(v())));
    }

    #[test]
    fn test_host_without_hyperv_fails_its_branch() {
        let fleet = MemoryFleet::new();
        fleet.add_host_without_hyperv("h");

        let report = reconcile_simple(&scenario(1), &fleet, &options()).unwrap();
        let h = ResourceKey::host("h");
        assert!(matches!(
            report.outcome(&h),
            Some(Outcome::Failed {
                category: ErrorCategory::InvalidOperation,
                ..
            })
        ));
        for key in [s(), v(), a()] {
            assert_eq!(report.outcome(&key), Some(&Outcome::skipped_by(&h)));
        }
        assert_eq!(report.status, RunStatus::PartialFailure);
        assert!(fleet.journal().is_empty());
    }

    #[test]
    fn test_host_installs_hyperv_when_allowed() {
        let fleet = MemoryFleet::new();
        fleet.add_host_without_hyperv("h");
        let graph = ResourceGraph::build(vec![
            Host::new("h")
                .with_path_style(PathStyle::Posix)
                .with_install(true)
                .into(),
            Switch::new("h", "s", SwitchKind::Internal).into(),
        ])
        .unwrap();

        let report = reconcile_simple(&graph, &fleet, &options()).unwrap();
        let h = ResourceKey::host("h");
        assert_eq!(
            report.outcome(&h),
            Some(&Outcome::Updated {
                fields: vec![FieldChange {
                    field: fields::HYPERV_ROLE,
                    from: "absent".into(),
                    to: "installed".into(),
                }]
            })
        );
        assert_eq!(report.outcome(&s()), Some(&Outcome::Created));
        assert_eq!(
            fleet.journal(),
            vec![
                JournalEntry::Update(h, vec![fields::HYPERV_ROLE]),
                JournalEntry::Create(s()),
            ]
        );
    }

    #[test]
    fn test_inventory_failure_is_a_warning() {
        let fleet = MemoryFleet::new();
        fleet.add_host("h");
        fleet.fail_inventory(
            "h",
            Error::HostUnreachable {
                host: "h".into(),
                message: "connection reset".into(),
            },
        );

        let report = reconcile_simple(&scenario(1), &fleet, &options()).unwrap();
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.summary.created, 3);
        assert_eq!(report.warnings.len(), 3);
        assert!(report.warnings[0].contains("could not list vm resources on h"));
        assert!(report.entries.iter().all(|e| !e.orphan));
    }

    #[test]
    fn test_dry_run_plans_without_mutating() {
        let fleet = MemoryFleet::new();
        fleet.add_host("h");
        let dry = ReconcileOptions {
            dry_run: true,
            ..options()
        };

        let report = reconcile_simple(&scenario(1), &fleet, &dry).unwrap();
        assert!(fleet.journal().is_empty());
        assert_eq!(report.summary.planned, 3);
        assert_eq!(
            report.outcome(&a()),
            Some(&Outcome::Planned {
                operation: Operation::Create
            })
        );
    }

    #[test]
    fn test_cancelled_run_skips_everything_not_started() {
        let fleet = MemoryFleet::new();
        fleet.add_host("h");
        let cancel = CancelToken::new();
        cancel.cancel();

        let report =
            reconcile(&scenario(1), &fleet, &options(), &NoProgress, &cancel).unwrap();
        assert!(fleet.journal().is_empty());
        assert!(report.entries.iter().all(|e| e.outcome
            == Outcome::Skipped {
                cause: SkipCause::Cancelled
            }));
    }

    #[test]
    fn test_progress_events() {
        #[derive(Default)]
        struct Recorder(Mutex<Vec<String>>);
        impl ProgressCallback for Recorder {
            fn on_host_start(&self, host: &str, count: usize) {
                self.0.lock().unwrap().push(format!("start {host} {count}"));
            }
            fn on_resource_start(&self, key: &ResourceKey, operation: &Operation) {
                self.0.lock().unwrap().push(format!("{operation} {key}"));
            }
            fn on_resource_complete(&self, key: &ResourceKey, outcome: &crate::report::Outcome) {
                self.0.lock().unwrap().push(format!("{} {key}", outcome.label()));
            }
            fn on_host_complete(&self, host: &str) {
                self.0.lock().unwrap().push(format!("done {host}"));
            }
        }

        let fleet = MemoryFleet::new();
        fleet.add_host("h");
        let recorder = Recorder::default();
        let graph = ResourceGraph::build(vec![
            host("h"),
            Switch::new("h", "s", SwitchKind::Internal).into(),
        ])
        .unwrap();
        reconcile(&graph, &fleet, &options(), &recorder, &CancelToken::new()).unwrap();

        let events = recorder.0.into_inner().unwrap();
        assert_eq!(
            events,
            vec![
                "start h 2",
                "no-op host:h",
                "create switch:h/s",
                "created switch:h/s",
                "done h",
            ]
        );
    }
}
