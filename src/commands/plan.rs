//! `hvconverge plan` - dry-run reconciliation

use crate::Context;
use crate::cli::PlanArgs;
use crate::render;
use anyhow::Result;
use converge::CancelToken;

pub fn run(ctx: &Context, args: &PlanArgs) -> Result<u8> {
    let loaded = super::load(&args.run.manifest)?;
    let options = loaded.manifest.options(super::overrides(&args.run, true));

    let report = super::reconcile(
        &loaded.graph,
        &options,
        &CancelToken::new(),
        super::quiet_output(ctx, args.json),
    )?;

    if args.json {
        super::print_json(&report)?;
    } else {
        render::plan(&report, ctx.verbose > 0);
    }
    Ok(super::exit_code(&report))
}
