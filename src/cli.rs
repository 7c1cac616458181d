use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "hvconverge")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Converge a fleet of Hyper-V hosts to a declared manifest", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check the manifest and print the apply order
    Validate(ManifestArgs),

    /// Show what apply would change, without changing anything
    Plan(PlanArgs),

    /// Converge every host to the manifest
    Apply(ApplyArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Arguments
// ============================================================================

#[derive(Args)]
pub struct ManifestArgs {
    /// Fleet manifest (default: ./hvconverge.toml, then ~/.config/hvconverge/hvconverge.toml)
    #[arg(short, long, env = "HVCONVERGE_FILE")]
    pub file: Option<String>,
}

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub manifest: ManifestArgs,

    /// Delete resources found on hosts but not declared
    #[arg(long)]
    pub prune: bool,

    /// Number of hosts reconciled in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Attempts per operation on transient errors
    #[arg(long)]
    pub retries: Option<u32>,
}

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Probe and diff only (same as plan)
    #[arg(short, long)]
    pub dry_run: bool,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_flags() {
        let cli = Cli::parse_from([
            "hvconverge", "-vv", "apply", "--file", "fleet.toml", "--prune", "-j", "8", "--yes",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Apply(args) => {
                assert_eq!(args.run.manifest.file.as_deref(), Some("fleet.toml"));
                assert!(args.run.prune);
                assert_eq!(args.run.jobs, Some(8));
                assert_eq!(args.run.retries, None);
                assert!(args.yes);
                assert!(!args.json);
            }
            _ => panic!("expected apply"),
        }
    }
}
