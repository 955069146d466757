//! The Varnish manifest: turns configuration into a resource graph
//!
//! All branching on configuration happens here. Flags become concrete
//! desired states and the secret policy becomes a [`SecretValue`] before
//! any resource is declared; providers never see the config.

use declarative::{
    ExecSpec, FileSpec, PackageEnsure, Resource, ResourceGraph, ResourceId, Result,
    ServiceEnsure,
};
use std::fmt;

use crate::config::{Manifest, RepoConfig};
use crate::templates;

/// How the management secret is obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretPolicy {
    /// No secret; varnishd runs without `-S`
    None,
    /// Generate a random secret on every graph build
    Auto,
    /// Use this value
    Literal(String),
}

impl SecretPolicy {
    pub fn parse(value: &str) -> Self {
        match value {
            "" => Self::None,
            "auto" => Self::Auto,
            literal => Self::Literal(literal.to_string()),
        }
    }

    /// Resolve the policy once, for one graph build
    pub fn derive(&self) -> SecretValue {
        match self {
            Self::None => SecretValue {
                value: String::new(),
                generated: false,
            },
            Self::Auto => SecretValue {
                value: uuid::Uuid::new_v4().to_string(),
                generated: true,
            },
            Self::Literal(value) => SecretValue {
                value: value.clone(),
                generated: false,
            },
        }
    }
}

/// The secret for one graph build
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue {
    value: String,
    generated: bool,
}

impl SecretValue {
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Generated secrets differ per build, so they must not overwrite a
    /// secret already on disk
    pub fn is_generated(&self) -> bool {
        self.generated
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue")
            .field("value", &if self.is_empty() { "" } else { "<redacted>" })
            .field("generated", &self.generated)
            .finish()
    }
}

/// A built manifest: the graph plus the secret it was built with
#[derive(Debug)]
pub struct BuiltManifest {
    pub graph: ResourceGraph,
    pub secret: SecretValue,
}

/// Declare every resource of the Varnish install and wire the edges
pub fn build(manifest: &Manifest) -> Result<BuiltManifest> {
    let secret = SecretPolicy::parse(&manifest.varnish.secret).derive();
    let graph = build_with_secret(manifest, &secret)?;
    Ok(BuiltManifest { graph, secret })
}

fn build_with_secret(manifest: &Manifest, secret: &SecretValue) -> Result<ResourceGraph> {
    let v = &manifest.varnish;
    let mut graph = ResourceGraph::new();

    let package = graph.declare(Resource::package(
        "varnish",
        PackageEnsure::parse(&v.version),
    ))?;

    if manifest.repo.manage {
        let refreshed = declare_repository(&mut graph, &manifest.repo)?;
        graph.require(&package, &refreshed)?;
    }

    // varnishd
    let varnish = graph.declare(Resource::service(
        "varnish",
        ServiceEnsure::from_flag(v.start_service),
    ))?;
    graph.require(&varnish, &package)?;

    let defaults = graph.declare(Resource::file(
        root_file(templates::VARNISH_DEFAULT_PATH, 0o644)
            .content(templates::varnish_default(v, !secret.is_empty())),
    ))?;
    subscribe(&mut graph, &varnish, &defaults, &package)?;

    if !secret.is_empty() {
        let mut spec = root_file(&v.secret_file, 0o600).content(secret.as_str());
        if secret.is_generated() {
            spec = spec.no_replace();
        }
        let secret_file = graph.declare(Resource::file(spec))?;
        subscribe(&mut graph, &varnish, &secret_file, &package)?;
    }

    if let Some(source) = &v.vcl_source {
        let vcl = graph.declare(Resource::file(
            root_file(&v.vcl_conf, 0o644).source(source),
        ))?;
        subscribe(&mut graph, &varnish, &vcl, &package)?;
    }

    // varnishncsa
    let ncsa = graph.declare(Resource::service(
        "varnishncsa",
        ServiceEnsure::from_flag(v.start_ncsa),
    ))?;
    graph.require(&ncsa, &varnish)?;

    let ncsa_default = graph.declare(Resource::file(
        root_file(templates::NCSA_DEFAULT_PATH, 0o644).content(templates::ncsa_default(v)),
    ))?;
    subscribe(&mut graph, &ncsa, &ncsa_default, &package)?;

    let ncsa_init = graph.declare(Resource::file(
        root_file(templates::NCSA_INIT_PATH, 0o755).content(templates::ncsa_init(v)),
    ))?;
    subscribe(&mut graph, &ncsa, &ncsa_init, &package)?;

    // varnishlog
    let log = graph.declare(Resource::service(
        "varnishlog",
        ServiceEnsure::from_flag(v.start_log),
    ))?;
    graph.require(&log, &varnish)?;

    graph.validate()?;
    log::debug!("manifest declares {} resources", graph.len());
    Ok(graph)
}

/// Key download, key import, source list and a guarded index refresh.
/// Returns the refresh exec, which the package must require.
fn declare_repository(graph: &mut ResourceGraph, repo: &RepoConfig) -> Result<ResourceId> {
    let key = graph.declare(Resource::file(
        root_file(templates::APT_KEY_PATH, 0o644).url(&repo.key_url),
    ))?;

    let import = graph.declare(Resource::exec(
        "apt-key add varnish",
        ExecSpec::new(format!("apt-key add {}", templates::APT_KEY_PATH))
            .unless("apt-key list 2>/dev/null | grep -qi varnish"),
    ))?;
    graph.require(&import, &key)?;

    let source = graph.declare(Resource::file(
        root_file(templates::APT_SOURCE_PATH, 0o644).content(templates::apt_source(repo)),
    ))?;
    graph.require(&source, &import)?;

    let refresh = graph.declare(Resource::exec(
        "apt-get update",
        ExecSpec::new("apt-get update").unless(cache_is_fresh(
            "/var/cache/apt/pkgcache.bin",
            "/etc/apt/sources.list.d",
            "/etc/apt/sources.list",
        )),
    ))?;
    graph.require(&refresh, &source)?;

    Ok(refresh)
}

/// Shell test that succeeds when `cache` is newer than the source lists
///
/// Hosts with only deb822 sources have no `sources.list`; `-nt` against a
/// missing file is false, so that clause only applies when the file exists.
fn cache_is_fresh(cache: &str, sources_dir: &str, sources_list: &str) -> String {
    format!(
        "[ {cache} -nt {sources_dir} ] && \
         {{ [ ! -e {sources_list} ] || [ {cache} -nt {sources_list} ]; }}"
    )
}

/// `file` is installed after `package` and changes to it restart `service`
fn subscribe(
    graph: &mut ResourceGraph,
    service: &ResourceId,
    file: &ResourceId,
    package: &ResourceId,
) -> Result<()> {
    graph.require(file, package)?;
    graph.require(service, file)?;
    graph.notify(file, service)
}

fn root_file(path: &str, mode: u32) -> FileSpec {
    FileSpec::new(path).mode(mode).owner("root").group("root")
}
