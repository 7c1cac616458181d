//! `hvconverge apply` - plan, confirm, reconcile

use crate::Context;
use crate::cli::ApplyArgs;
use crate::render::{self, PlanCounts};
use crate::ui;
use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use converge::{CancelToken, ReconcileOptions};

/// Conventional exit status after a second Ctrl-C
const EXIT_INTERRUPTED: i32 = 130;

pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<u8> {
    let loaded = super::load(&args.run.manifest)?;
    let options = loaded.manifest.options(super::overrides(&args.run, args.dry_run));
    let quiet = super::quiet_output(ctx, args.json);
    let verbose = ctx.verbose > 0;

    let cancel = CancelToken::new();
    install_interrupt_handler(&cancel)?;

    if !options.dry_run && !args.yes {
        let plan_options = ReconcileOptions {
            dry_run: true,
            ..options.clone()
        };
        let plan = super::reconcile(&loaded.graph, &plan_options, &cancel, quiet)?;
        if !args.json {
            render::plan(&plan, verbose);
        }

        if PlanCounts::from_report(&plan).changes() == 0 {
            if args.json {
                super::print_json(&plan)?;
            }
            return Ok(super::exit_code(&plan));
        }
        if cancel.is_cancelled() || !confirm_proceed()? {
            println!();
            ui::info("Aborted, no changes made");
            return Ok(0);
        }
    }

    let report = super::reconcile(&loaded.graph, &options, &cancel, quiet)?;

    if args.json {
        super::print_json(&report)?;
    } else if report.dry_run {
        render::plan(&report, verbose);
    } else {
        render::report(&report, verbose);
    }
    Ok(super::exit_code(&report))
}

/// Confirm with user
fn confirm_proceed() -> Result<bool> {
    let confirmed = dialoguer::Confirm::new()
        .with_prompt("Apply these changes?")
        .default(false)
        .interact()
        .context("Failed to read confirmation")?;
    Ok(confirmed)
}

/// First Ctrl-C stops new operations; a second one exits immediately
fn install_interrupt_handler(cancel: &CancelToken) -> Result<()> {
    let token = cancel.clone();
    ctrlc::set_handler(move || {
        if token.is_cancelled() {
            std::process::exit(EXIT_INTERRUPTED);
        }
        token.cancel();
        eprintln!(
            "\n{} Cancelling: waiting for operations in flight (Ctrl-C again to abort)",
            "⚠".yellow()
        );
    })
    .context("Failed to install Ctrl-C handler")
}
