//! `hvconverge validate` - check the manifest and show the apply order

use crate::Context;
use crate::cli::ManifestArgs;
use crate::ui;
use anyhow::{Context as AnyhowContext, Result};

pub fn run(ctx: &Context, args: &ManifestArgs) -> Result<u8> {
    let loaded = super::load(args)?;
    let graph = &loaded.graph;

    let order = converge::apply_order(graph).context("Could not resolve the apply order")?;
    let streams = converge::partition_by_host(&order);

    if !ctx.quiet {
        ui::header("Apply order");
        ui::kv("manifest", &loaded.path.display().to_string());
        ui::kv("prune", if loaded.manifest.prune { "yes" } else { "no" });

        for (host, keys) in &streams {
            ui::section(host);
            for (i, key) in keys.iter().enumerate() {
                ui::step(i + 1, keys.len(), &key.to_string());
                if ctx.verbose > 0
                    && let Some(resource) = graph.get(key)
                {
                    ui::dim(&resource.description());
                }
            }
        }
        println!();
    }

    ui::success(&format!(
        "{} valid: {} on {}",
        loaded.path.display(),
        ui::plural(graph.len(), "resource"),
        ui::plural(streams.len(), "host")
    ));
    Ok(0)
}
