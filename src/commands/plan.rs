//! `plan` - show drift without changing anything

use anyhow::{Context as _, Result};
use colored::Colorize;
use declarative::{
    ApplyContext, DiffSummary, ResourceDiff, ResourceGraph, ResourceKind, compute_diffs,
    group_by_kind,
};
use std::collections::BTreeSet;
use std::fs;

use crate::Context;
use crate::providers::{self, FileProvider};
use crate::{manifest, ui};

pub fn run(ctx: &Context) -> Result<()> {
    let config = super::load_manifest(ctx)?;
    let built = manifest::build(&config).context("Invalid resource graph")?;
    let host = providers::host(&config.engine);
    let apply_ctx = ApplyContext::new(true, config.engine.timeout());

    let diffs = compute_diffs(&built.graph, &host, &apply_ctx)
        .context("Failed to inspect host state")?;

    if diffs.is_empty() {
        ui::success(&format!(
            "All {} resources are in sync",
            built.graph.len()
        ));
        return Ok(());
    }

    let files = FileProvider::new(config.engine.retry(), config.engine.timeout());
    for (kind, group) in group_by_kind(&diffs) {
        ui::section(&format!("{kind} ({})", group.len()));
        for diff in group {
            print_diff(diff);
            if kind == ResourceKind::File && !ctx.quiet {
                show_content_diff(&files, &built.graph, diff);
            }
        }
    }

    let summary = DiffSummary::from_diffs(&diffs);
    let restarts: BTreeSet<String> = diffs
        .iter()
        .flat_map(|d| d.notifies.iter().map(ToString::to_string))
        .collect();

    ui::header("Plan");
    ui::kv("To add", &summary.additions.to_string());
    ui::kv("To change", &summary.modifications.to_string());
    ui::kv("To remove", &summary.removals.to_string());
    if !restarts.is_empty() {
        let names: Vec<String> = restarts.into_iter().collect();
        ui::kv("Would restart", &names.join(", "));
    }
    Ok(())
}

fn print_diff(diff: &ResourceDiff) {
    let marker = if diff.is_addition() {
        "+".green()
    } else if diff.is_removal() {
        "-".red()
    } else {
        "~".yellow()
    };
    println!("  {marker} {} {}", diff.id, diff.description.dimmed());
    println!(
        "      {}",
        format!("{} → {}", diff.current, diff.desired).dimmed()
    );
}

/// Unified line diff between the file on disk and what would be written
fn show_content_diff(files: &FileProvider, graph: &ResourceGraph, diff: &ResourceDiff) {
    let Ok(spec) = graph.resource(&diff.id).and_then(|r| r.as_file()) else {
        return;
    };
    if spec.mode.is_some_and(|mode| mode & 0o077 == 0) {
        ui::dim("(content hidden: file is private)");
        return;
    }
    if !spec.replace && spec.path.exists() {
        return;
    }

    let desired = match files.desired_content(spec) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return,
        Err(e) => {
            ui::dim(&format!("(cannot compute content: {e})"));
            return;
        }
    };
    let current = fs::read(&spec.path).unwrap_or_default();

    let (Ok(old), Ok(new)) = (String::from_utf8(current), String::from_utf8(desired)) else {
        ui::dim("(binary content)");
        return;
    };

    let text_diff = similar::TextDiff::from_lines(&old, &new);
    for change in text_diff.iter_all_changes() {
        let line = match change.tag() {
            similar::ChangeTag::Delete => format!("- {change}").red(),
            similar::ChangeTag::Insert => format!("+ {change}").green(),
            similar::ChangeTag::Equal => continue,
        };
        print!("      {line}");
        if change.missing_newline() {
            println!();
        }
    }
}
