//! Terminal progress for apply runs

use colored::Colorize;
use declarative::{ConvergenceResult, ProgressCallback, ResourceId};
use indicatif::{ProgressBar, ProgressStyle};

use crate::ui;

/// Spinner plus one line per resource
pub struct ApplyProgress {
    bar: ProgressBar,
    quiet: bool,
}

impl ApplyProgress {
    pub fn new(quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        if let Ok(style) = ProgressStyle::default_bar().template("{spinner:.green} [{pos}/{len}] {msg}")
        {
            bar.set_style(style);
        }
        Self { bar, quiet }
    }

    fn line(&self, text: String) {
        if !self.quiet {
            self.bar.println(text);
        }
    }
}

impl ProgressCallback for ApplyProgress {
    fn on_start(&mut self, total: usize, dry_run: bool) {
        self.bar.set_length(total as u64);
        if dry_run {
            self.line(format!("{}", "Dry run: nothing will be changed".yellow()));
        }
    }

    fn on_resource_start(&mut self, _id: &ResourceId, description: &str) {
        self.bar.set_message(description.to_string());
        self.bar.tick();
    }

    fn on_resource_complete(&mut self, id: &ResourceId, result: &ConvergenceResult) {
        self.bar.inc(1);
        self.line(ui::result_line(&id.to_string(), result));
    }

    fn on_restart(&mut self, id: &ResourceId) {
        self.line(format!("{} {id} {}", "↻".cyan(), "restarted".cyan()));
    }

    fn on_finish(&mut self) {
        self.bar.finish_and_clear();
    }
}
