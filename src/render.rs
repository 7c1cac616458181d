//! Terminal rendering of plans and run reports

use crate::ui;
use chrono::Local;
use colored::{ColoredString, Colorize};
use converge::{EntityReport, FieldChange, Operation, Outcome, RunReport, RunStatus, SkipCause};
use std::collections::BTreeMap;

/// Planned operations by type
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PlanCounts {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub orphaned: usize,
    pub unchanged: usize,
    /// Failed or skipped while planning
    pub blocked: usize,
}

impl PlanCounts {
    pub fn from_report(report: &RunReport) -> Self {
        let mut counts = Self::default();
        for entry in &report.entries {
            match &entry.outcome {
                Outcome::Planned { operation } => match operation {
                    Operation::Create => counts.create += 1,
                    Operation::Update { .. } => counts.update += 1,
                    Operation::Replace { .. } => counts.replace += 1,
                    Operation::Delete => counts.delete += 1,
                    Operation::Orphaned => counts.orphaned += 1,
                    Operation::NoOp => counts.unchanged += 1,
                },
                Outcome::NoOp => counts.unchanged += 1,
                Outcome::Orphaned => counts.orphaned += 1,
                Outcome::Failed { .. } | Outcome::Skipped { .. } => counts.blocked += 1,
                Outcome::Created
                | Outcome::Updated { .. }
                | Outcome::Replaced { .. }
                | Outcome::Deleted => {}
            }
        }
        counts
    }

    /// Operations that would change a host
    pub fn changes(&self) -> usize {
        self.create + self.update + self.replace + self.delete
    }
}

fn operation_symbol(operation: &Operation) -> ColoredString {
    let symbol = operation.symbol();
    match operation {
        Operation::Create => symbol.green(),
        Operation::Update { .. } => symbol.yellow(),
        Operation::Replace { .. } => symbol.magenta(),
        Operation::Delete => symbol.red(),
        Operation::NoOp | Operation::Orphaned => symbol.dimmed(),
    }
}

/// Colored marker for an outcome
pub fn symbol(outcome: &Outcome) -> ColoredString {
    match outcome {
        Outcome::Planned { operation } => operation_symbol(operation),
        Outcome::NoOp => "=".dimmed(),
        Outcome::Created => "+".green(),
        Outcome::Updated { .. } => "~".yellow(),
        Outcome::Replaced { .. } => "-/+".magenta(),
        Outcome::Deleted => "-".red(),
        Outcome::Orphaned => "?".dimmed(),
        Outcome::Skipped { .. } => "⊘".dimmed(),
        Outcome::Failed { .. } => "✗".red(),
    }
}

fn field_list(fields: &[FieldChange]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Plain-text description of an entry's outcome
pub fn describe(entry: &EntityReport) -> String {
    match &entry.outcome {
        Outcome::Planned { operation } => match operation {
            Operation::NoOp => "up to date".into(),
            Operation::Create => "will create".into(),
            Operation::Update { fields } => format!("will update {}", field_list(fields)),
            Operation::Replace { fields } => format!("will replace ({})", field_list(fields)),
            Operation::Delete => "undeclared, will delete".into(),
            Operation::Orphaned => "undeclared, kept".into(),
        },
        Outcome::NoOp => "up to date".into(),
        Outcome::Created => "created".into(),
        Outcome::Updated { fields } => format!("updated {}", field_list(fields)),
        Outcome::Replaced { fields } => format!("replaced ({})", field_list(fields)),
        Outcome::Deleted if entry.orphan => "deleted undeclared".into(),
        Outcome::Deleted => "deleted".into(),
        Outcome::Orphaned => "undeclared, kept (use --prune to delete)".into(),
        Outcome::Skipped {
            cause: SkipCause::Dependency { ancestor },
        } => format!("skipped, depends on {ancestor}"),
        Outcome::Skipped {
            cause: SkipCause::Cancelled,
        } => "skipped, run cancelled".into(),
        Outcome::Failed { error, .. } => format!("failed: {error}"),
    }
}

/// Entries grouped by host, in report order within each host
fn by_host<'a>(
    entries: impl Iterator<Item = &'a EntityReport>,
) -> BTreeMap<&'a str, Vec<&'a EntityReport>> {
    let mut groups: BTreeMap<&str, Vec<&EntityReport>> = BTreeMap::new();
    for entry in entries {
        groups.entry(entry.key.host.as_str()).or_default().push(entry);
    }
    groups
}

fn print_entry(entry: &EntityReport) {
    let line = describe(entry);
    let line = if matches!(entry.outcome, Outcome::Failed { .. }) {
        line.red()
    } else {
        line.dimmed()
    };
    println!("│   {} {:<40} {}", symbol(&entry.outcome), entry.key.to_string(), line);
}

/// Display a dry-run plan
pub fn plan(report: &RunReport, verbose: bool) {
    let counts = PlanCounts::from_report(report);

    let shown = report
        .entries
        .iter()
        .filter(|e| verbose || !matches!(e.outcome, Outcome::NoOp));
    let groups = by_host(shown);

    println!();
    println!("┌─ {} ─────────────────────────────────────────┐", "Plan".bold());
    println!("│");
    for (host, entries) in &groups {
        println!("│ {}", host.bold());
        for entry in entries {
            print_entry(entry);
        }
        println!("│");
    }
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Plan: {} to create, {} to update, {} to replace, {} to delete",
        counts.create.to_string().green(),
        counts.update.to_string().yellow(),
        counts.replace.to_string().magenta(),
        counts.delete.to_string().red()
    );
    if counts.orphaned > 0 {
        println!("│       {} undeclared resources kept", counts.orphaned);
    }
    if counts.blocked > 0 {
        println!(
            "│       {} could not be planned",
            counts.blocked.to_string().red()
        );
    }
    println!("└─────────────────────────────────────────────────────┘");

    print_warnings(report);

    if counts.changes() == 0 && counts.blocked == 0 {
        println!();
        println!("  {} No changes needed", "✓".green());
    }
}

/// Display the outcome of a run
pub fn report(report: &RunReport, verbose: bool) {
    let shown = report
        .entries
        .iter()
        .filter(|e| verbose || !matches!(e.outcome, Outcome::NoOp));
    let groups = by_host(shown);

    if !groups.is_empty() {
        println!();
        println!("┌─ {} ─────────────────────────────────────────┐", "Results".bold());
        println!("│");
        for (host, entries) in &groups {
            println!("│ {}", host.bold());
            for entry in entries {
                print_entry(entry);
            }
            println!("│");
        }
        println!("└─────────────────────────────────────────────────────┘");
    }

    print_warnings(report);
    print_summary(report);
}

fn print_warnings(report: &RunReport) {
    if report.warnings.is_empty() {
        return;
    }
    println!();
    for warning in &report.warnings {
        ui::warn(warning);
    }
}

fn print_summary(report: &RunReport) {
    let summary = &report.summary;
    let elapsed = (report.finished_at - report.started_at).num_milliseconds();

    println!();
    match report.status {
        RunStatus::Success => println!(
            "  {} Fleet converged in {}",
            "✓".green().bold(),
            ui::format_elapsed(elapsed)
        ),
        RunStatus::PartialFailure => println!(
            "  {} Fleet partially converged in {}",
            "⚠".yellow().bold(),
            ui::format_elapsed(elapsed)
        ),
        RunStatus::Fatal => println!("  {} No host could be reached", "✗".red().bold()),
    }
    ui::dim(&format!(
        "started {}",
        report
            .started_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
    ));

    if summary.created > 0 {
        println!("    • {} created", ui::plural(summary.created, "resource"));
    }
    if summary.updated > 0 {
        println!("    • {} updated", ui::plural(summary.updated, "resource"));
    }
    if summary.replaced > 0 {
        println!("    • {} replaced", ui::plural(summary.replaced, "resource"));
    }
    if summary.deleted > 0 {
        println!("    • {} deleted", ui::plural(summary.deleted, "resource"));
    }
    if summary.no_op > 0 {
        println!("    • {} already up to date", ui::plural(summary.no_op, "resource"));
    }
    if summary.orphaned > 0 {
        println!("    • {} undeclared", ui::plural(summary.orphaned, "resource"));
    }
    if summary.skipped > 0 {
        println!("    • {} skipped", ui::plural(summary.skipped, "resource"));
    }
    if summary.failed > 0 {
        println!(
            "    • {} {}",
            ui::plural(summary.failed, "resource"),
            "failed".red()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use converge::{ErrorCategory, ResourceKey};

    fn entry(key: ResourceKey, outcome: Outcome) -> EntityReport {
        EntityReport {
            key,
            outcome,
            orphan: false,
        }
    }

    fn update(field: &'static str, from: &str, to: &str) -> Vec<FieldChange> {
        vec![FieldChange {
            field,
            from: from.into(),
            to: to.into(),
        }]
    }

    #[test]
    fn test_plan_counts() {
        let entries = vec![
            entry(ResourceKey::host("h"), Outcome::NoOp),
            entry(
                ResourceKey::switch("h", "s"),
                Outcome::Planned {
                    operation: Operation::Create,
                },
            ),
            entry(
                ResourceKey::vm("h", "v"),
                Outcome::Planned {
                    operation: Operation::Update {
                        fields: update("cpu_count", "1", "2"),
                    },
                },
            ),
            entry(ResourceKey::vm("h", "old"), Outcome::Orphaned),
            entry(
                ResourceKey::vhd("h", "/x"),
                Outcome::skipped_by(&ResourceKey::host("h")),
            ),
        ];
        let report = RunReport::new(Utc::now(), true, entries, Vec::new(), 1, 1);

        let counts = PlanCounts::from_report(&report);
        assert_eq!(
            counts,
            PlanCounts {
                create: 1,
                update: 1,
                replace: 0,
                delete: 0,
                orphaned: 1,
                unchanged: 1,
                blocked: 1,
            }
        );
        assert_eq!(counts.changes(), 2);
    }

    #[test]
    fn test_describe() {
        let updated = entry(
            ResourceKey::vm("h", "v"),
            Outcome::Updated {
                fields: update("cpu_count", "1", "2"),
            },
        );
        assert_eq!(describe(&updated), "updated cpu_count: 1 -> 2");

        let skipped = entry(
            ResourceKey::vm("h", "v"),
            Outcome::skipped_by(&ResourceKey::switch("h", "s")),
        );
        assert_eq!(describe(&skipped), "skipped, depends on switch:h/s");

        let failed = entry(
            ResourceKey::vm("h", "v"),
            Outcome::Failed {
                category: ErrorCategory::InvalidOperation,
                error: "boom".into(),
            },
        );
        assert_eq!(describe(&failed), "failed: boom");

        let mut pruned = entry(ResourceKey::vm("h", "old"), Outcome::Deleted);
        pruned.orphan = true;
        assert_eq!(describe(&pruned), "deleted undeclared");
    }

    #[test]
    fn test_by_host_keeps_report_order() {
        let entries = [
            entry(ResourceKey::host("b"), Outcome::NoOp),
            entry(ResourceKey::host("a"), Outcome::NoOp),
            entry(ResourceKey::switch("b", "s"), Outcome::Created),
        ];
        let groups = by_host(entries.iter());
        let hosts: Vec<_> = groups.keys().copied().collect();
        assert_eq!(hosts, vec!["a", "b"]);
        assert_eq!(groups["b"][1].key, ResourceKey::switch("b", "s"));
    }
}
