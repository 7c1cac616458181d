//! Progress bar for reconciliation runs.

use colored::Colorize;
use converge::{Operation, Outcome, ProgressCallback, ResourceKey};
use indicatif::{ProgressBar, ProgressStyle};

/// Renders engine progress events on one bar shared by every host stream.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    /// A bar sized for the declared entities; orphans extend it as they appear
    pub fn new(total: usize, hidden: bool) -> Self {
        let bar = if hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(total as u64)
        };
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressCallback for BarProgress {
    fn on_host_start(&self, host: &str, _count: usize) {
        self.bar.set_message(format!("probing {host}"));
    }

    fn on_resource_start(&self, key: &ResourceKey, operation: &Operation) {
        self.bar.set_message(format!("{} {key}", operation.label()));
    }

    fn on_resource_complete(&self, key: &ResourceKey, outcome: &Outcome) {
        if self.bar.position() >= self.bar.length().unwrap_or(0) {
            self.bar.inc_length(1);
        }
        if let Outcome::Failed { error, .. } = outcome {
            self.bar
                .suspend(|| eprintln!("  {} {} ({})", "✗".red(), key, error));
        }
        self.bar.inc(1);
    }

    fn on_host_complete(&self, host: &str) {
        log::debug!("{host} finished");
    }
}
