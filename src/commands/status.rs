//! `status` - show the last recorded apply

use anyhow::Result;
use chrono::Local;
use colored::Colorize;
use declarative::ConvergenceResult;

use crate::Context;
use crate::state::LastRun;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let config = super::load_manifest(ctx)?;
    let path = config.engine.state_path();

    let Some(run) = LastRun::load(&path)? else {
        ui::info(&format!("No apply has been recorded at {}", path.display()));
        return Ok(());
    };

    let finished = run.finished_at.with_timezone(&Local);
    let outcome = match (run.success, run.dry_run) {
        (true, true) => "dry run".yellow(),
        (true, false) => "converged".green(),
        (false, _) => "failed".red(),
    };

    ui::header("Last apply");
    ui::kv("Finished", &finished.format("%Y-%m-%d %H:%M:%S").to_string());
    ui::kv("Outcome", &outcome.to_string());
    ui::kv(
        "Resources",
        &format!(
            "{} changed, {} unchanged, {} failed, {} skipped",
            run.summary.changed, run.summary.unchanged, run.summary.failed, run.summary.skipped
        ),
    );
    if !run.restarted.is_empty() {
        ui::kv("Restarted", &run.restarted.join(", "));
    }
    if !run.pending_restarts.is_empty() {
        ui::kv("Would restart", &run.pending_restarts.join(", "));
    }

    let notable: Vec<_> = run
        .resources
        .iter()
        .filter(|r| ctx.verbose > 0 || !matches!(r.result, ConvergenceResult::Unchanged))
        .collect();
    if !notable.is_empty() {
        ui::section("Resources");
        for record in notable {
            println!("  {}", ui::result_line(&record.id, &record.result));
        }
    }

    if let Some(error) = &run.error {
        println!();
        ui::error(error);
    }

    Ok(())
}
