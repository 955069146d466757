//! `apply` - converge the host

use anyhow::{Context as _, Result};
use declarative::{ApplyOptions, ConvergenceEngine, ConvergenceReport};
use dialoguer::Confirm;
use std::io::IsTerminal;
use std::path::Path;

use crate::Context;
use crate::cli::ApplyArgs;
use crate::progress::ApplyProgress;
use crate::state::LastRun;
use crate::{manifest, providers, ui};

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let config = super::load_manifest(ctx)?;
    let dry_run = args.dry_run || config.engine.dry_run;
    let jobs = args.jobs.unwrap_or(config.engine.jobs).max(1);

    let built = manifest::build(&config).context("Invalid resource graph")?;
    log::info!(
        "{} resources, jobs={jobs}, dry_run={dry_run}",
        built.graph.len()
    );

    if !dry_run && !args.yes && !confirm_proceed(built.graph.len())? {
        ui::info("Nothing changed.");
        return Ok(());
    }

    let options = ApplyOptions {
        dry_run,
        jobs,
        timeout: config.engine.timeout(),
    };
    let mut engine = ConvergenceEngine::new(providers::host(&config.engine), options);
    let mut progress = ApplyProgress::new(ctx.quiet);
    let state_path = config.engine.state_path();

    match engine.apply_with_progress(&built.graph, &mut progress) {
        Ok(report) => {
            record(&state_path, &report, dry_run, None);
            print_summary(&report, dry_run);
            Ok(())
        }
        Err(err) => {
            if let Some(report) = err.report() {
                record(&state_path, report, dry_run, Some(err.to_string()));
                print_summary(report, dry_run);
            }
            ui::error(err.category().description());
            Err(anyhow::Error::new(err).context("Convergence failed"))
        }
    }
}

fn confirm_proceed(count: usize) -> Result<bool> {
    if !std::io::stdin().is_terminal() {
        anyhow::bail!("Refusing to change this host without --yes (stdin is not a terminal)");
    }

    let confirmed = Confirm::new()
        .with_prompt(format!("Converge {count} resources on this host?"))
        .default(true)
        .interact()?;

    Ok(confirmed)
}

/// Write the last-run summary; a failure here never fails the apply
fn record(path: &Path, report: &ConvergenceReport, dry_run: bool, error: Option<String>) {
    let run = LastRun::from_report(report, dry_run, error);
    if let Err(e) = run.save(path) {
        ui::warn(&format!("Could not record this run: {e:#}"));
    }
}

fn print_summary(report: &ConvergenceReport, dry_run: bool) {
    let summary = report.summary();

    ui::header(if dry_run { "Dry run summary" } else { "Summary" });
    ui::kv("Changed", &summary.changed.to_string());
    ui::kv("Unchanged", &summary.unchanged.to_string());
    if summary.skipped > 0 {
        ui::kv("Would change", &summary.skipped.to_string());
    }
    if summary.failed > 0 {
        ui::kv("Failed", &summary.failed.to_string());
    }
    ui::kv("Restarted", &summary.restarted.to_string());

    if !report.pending_restarts.is_empty() {
        let names: Vec<String> = report
            .pending_restarts
            .iter()
            .map(ToString::to_string)
            .collect();
        ui::kv("Would restart", &names.join(", "));
    }

    println!();
    if !report.is_success() {
        ui::error("Host did not converge");
    } else if dry_run {
        ui::info("Dry run complete, nothing was changed");
    } else if summary.changed == 0 && summary.restarted == 0 {
        ui::success("Already converged");
    } else {
        ui::success("Converged");
    }
}
