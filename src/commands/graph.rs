//! `graph` - print resources, edges and apply order

use anyhow::{Context as _, Result};
use colored::Colorize;

use crate::Context;
use crate::{manifest, ui};

pub fn run(ctx: &Context) -> Result<()> {
    let config = super::load_manifest(ctx)?;
    let built = manifest::build(&config).context("Invalid resource graph")?;
    let graph = &built.graph;

    let order = graph.topological_order()?;
    let waves = graph.waves()?;

    ui::header(&format!("Resources ({})", graph.len()));
    for id in &order {
        let resource = graph.resource(id)?;
        println!("  {} {}", id.to_string().bold(), resource.description().dimmed());

        let requires: Vec<String> = graph.requirements_of(id).map(ToString::to_string).collect();
        if !requires.is_empty() {
            println!("      {} {}", "requires".dimmed(), requires.join(", "));
        }
        let notifies: Vec<String> = graph.notify_targets(id).map(ToString::to_string).collect();
        if !notifies.is_empty() {
            println!("      {} {}", "notifies".dimmed(), notifies.join(", ").cyan());
        }
    }

    if ctx.verbose > 0 {
        ui::section("Edges");
        for edge in graph.edges() {
            println!("  {} → {} {}", edge.from, edge.to, format!("({:?})", edge.kind).dimmed());
        }
    }

    ui::section("Apply order");
    for (index, id) in order.iter().enumerate() {
        println!("  {:>2}. {id}", index + 1);
    }

    ui::section(&format!("Waves ({})", waves.len()));
    for (index, wave) in waves.iter().enumerate() {
        let names: Vec<String> = wave.iter().map(ToString::to_string).collect();
        println!("  {:>2}: {}", index + 1, names.join(", "));
    }

    Ok(())
}
