// Manifest checks
pub mod validate;

// Reconciliation
pub mod apply;
pub mod plan;

use crate::Context;
use crate::cli::{ManifestArgs, RunArgs};
use crate::manifest::{self, Manifest, Overrides};
use crate::progress::BarProgress;
use anyhow::{Context as AnyhowContext, Result};
use converge::{CancelToken, ReconcileOptions, ResourceGraph, RunReport};
use hyperv::SshConnector;
use std::path::PathBuf;

/// Exit status for manifest, resolution and whole-fleet failures
pub const EXIT_FATAL: u8 = 3;

/// A manifest and the graph built from it
pub struct Loaded {
    pub path: PathBuf,
    pub manifest: Manifest,
    pub graph: ResourceGraph,
}

/// Find, parse and validate the manifest
pub fn load(args: &ManifestArgs) -> Result<Loaded> {
    let path = manifest::resolve_path(args.file.as_deref())?;
    log::debug!("loading manifest {}", path.display());

    let manifest = Manifest::load(&path)?;
    let graph = manifest
        .graph()
        .with_context(|| format!("Invalid fleet in {}", path.display()))?;

    Ok(Loaded {
        path,
        manifest,
        graph,
    })
}

fn overrides(run: &RunArgs, dry_run: bool) -> Overrides {
    Overrides {
        prune: run.prune,
        dry_run,
        jobs: run.jobs,
        retries: run.retries,
    }
}

/// Reconcile the fleet over ssh, showing progress unless `quiet`
fn reconcile(
    graph: &ResourceGraph,
    options: &ReconcileOptions,
    cancel: &CancelToken,
    quiet: bool,
) -> Result<RunReport> {
    let progress = BarProgress::new(graph.len(), quiet);
    let report = converge::reconcile(graph, &SshConnector, options, &progress, cancel);
    progress.finish();
    report.context("Could not resolve the apply order")
}

fn print_json(report: &RunReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    println!("{json}");
    Ok(())
}

fn exit_code(report: &RunReport) -> u8 {
    u8::try_from(report.exit_code()).unwrap_or(EXIT_FATAL)
}

fn quiet_output(ctx: &Context, json: bool) -> bool {
    ctx.quiet || json
}
