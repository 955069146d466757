mod cli;
mod commands;
mod config;
mod manifest;
mod progress;
mod providers;
mod retry;
mod runner;
mod state;
mod templates;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config: cli.config,
    };

    match cli.command {
        Command::Apply(args) => commands::apply::run(&ctx, args),
        Command::Plan => commands::plan::run(&ctx),
        Command::Graph => commands::graph::run(&ctx),
        Command::Status => commands::status::run(&ctx),
        Command::Render { file } => commands::render::run(&ctx, file),
        Command::Completions { shell } => {
            generate(
                shell,
                &mut Cli::command(),
                "varnish-converge",
                &mut io::stdout(),
            );
            Ok(())
        }
    }
}
