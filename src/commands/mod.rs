pub mod apply;
pub mod graph;
pub mod plan;
pub mod render;
pub mod status;

use anyhow::{Context as _, Result};

use crate::Context;
use crate::config::Manifest;

/// Load and validate the manifest named on the command line
pub(crate) fn load_manifest(ctx: &Context) -> Result<Manifest> {
    let manifest = Manifest::load(&ctx.config)?;
    manifest
        .validate()
        .with_context(|| format!("Invalid configuration in {}", ctx.config.display()))?;
    Ok(manifest)
}
