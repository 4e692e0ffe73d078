//! Progress bar for apply runs

use colored::Colorize;
use declarative::{Action, ApplySummary, Outcome, ProgressCallback, ResourceAddress};
use indicatif::{ProgressBar, ProgressStyle};

const BAR_TEMPLATE: &str = "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}";

/// Drives an indicatif bar from engine progress events
pub struct ApplyProgress {
    bar: ProgressBar,
    quiet: bool,
}

impl ApplyProgress {
    /// A bar that draws nothing when `quiet`
    pub fn new(quiet: bool) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            quiet,
        }
    }
}

impl ProgressCallback for ApplyProgress {
    fn on_apply_start(&mut self, count: usize) {
        if self.quiet {
            return;
        }
        self.bar = ProgressBar::new(count as u64);
        self.bar.set_style(
            ProgressStyle::default_bar()
                .template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
    }

    fn on_resource_start(&mut self, address: &ResourceAddress, action: Action) {
        if action.is_change() {
            self.bar.set_message(format!("{} {address}", action.symbol()));
        }
    }

    fn on_resource_complete(&mut self, address: &ResourceAddress, action: Action, outcome: &Outcome) {
        self.bar.inc(1);
        match outcome {
            Outcome::Failed { .. } => {
                self.bar
                    .println(format!("  {} {address}: {}", "✗".red(), outcome.cause()));
            }
            Outcome::Applied { .. } if action.is_change() => {
                self.bar.println(format!("  {} {address} ({action})", "✓".green()));
            }
            _ => {}
        }
    }

    fn on_apply_complete(&mut self, _summary: &ApplySummary) {
        self.bar.finish_and_clear();
    }
}
