//! `render` - print a generated file without touching the host

use anyhow::Result;

use crate::Context;
use crate::cli::RenderTarget;
use crate::manifest::SecretPolicy;
use crate::templates;

pub fn run(ctx: &Context, target: RenderTarget) -> Result<()> {
    let config = super::load_manifest(ctx)?;

    let text = match target {
        RenderTarget::Default => {
            let with_secret = SecretPolicy::parse(&config.varnish.secret) != SecretPolicy::None;
            templates::varnish_default(&config.varnish, with_secret)
        }
        RenderTarget::NcsaDefault => templates::ncsa_default(&config.varnish),
        RenderTarget::NcsaInit => templates::ncsa_init(&config.varnish),
        RenderTarget::AptSource => templates::apt_source(&config.repo),
    };

    print!("{text}");
    Ok(())
}
