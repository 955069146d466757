use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;

#[derive(Parser)]
#[command(name = "varnish-converge")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Install and configure Varnish Cache by converging declared state", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Manifest configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "VARNISH_CONVERGE_CONFIG",
        default_value = DEFAULT_CONFIG_PATH
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Converge this host to the manifest
    Apply(ApplyArgs),

    /// Show what apply would change, without changing anything
    Plan,

    /// Print resources, edges and apply order
    Graph,

    /// Show the result of the last apply
    Status,

    /// Print a generated file
    Render {
        /// File to render
        #[arg(value_enum)]
        file: RenderTarget,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Detect drift and report it, change nothing
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Resources applied in parallel within a dependency level
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum RenderTarget {
    /// /etc/default/varnish
    Default,
    /// /etc/default/varnishncsa
    NcsaDefault,
    /// /etc/init.d/varnishncsa
    NcsaInit,
    /// /etc/apt/sources.list.d/varnish.list
    AptSource,
}
