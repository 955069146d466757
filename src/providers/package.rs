//! dpkg/apt package provider

use declarative::{
    ApplyContext, CommandOutput, Error, PackageEnsure, PackageSpec, Provider, Resource,
    ResourceKind, ResourceState, Result,
};
use std::path::PathBuf;
use std::process::Command;

use crate::retry::{RetryConfig, with_retry};
use crate::runner;

/// apt messages that mean the mirror could not be reached
const NETWORK_MARKERS: &[&str] = &[
    "Temporary failure resolving",
    "Could not resolve",
    "Failed to fetch",
    "Connection timed out",
    "Connection failed",
    "Unable to connect",
];

/// The binaries this provider shells out to
#[derive(Debug, Clone)]
pub struct PackageTools {
    pub dpkg_query: PathBuf,
    pub apt_cache: PathBuf,
    pub apt_get: PathBuf,
}

impl Default for PackageTools {
    fn default() -> Self {
        Self {
            dpkg_query: "dpkg-query".into(),
            apt_cache: "apt-cache".into(),
            apt_get: "apt-get".into(),
        }
    }
}

pub struct PackageProvider {
    tools: PackageTools,
    retry: RetryConfig,
}

impl PackageProvider {
    pub fn new(retry: RetryConfig) -> Self {
        Self::with_tools(PackageTools::default(), retry)
    }

    pub fn with_tools(tools: PackageTools, retry: RetryConfig) -> Self {
        Self { tools, retry }
    }

    /// Installed version, if the package is fully installed
    fn installed_version(&self, name: &str, ctx: &ApplyContext) -> Result<Option<String>> {
        let mut cmd = Command::new(&self.tools.dpkg_query);
        cmd.args(["-W", "-f=${Status} ${Version}", name]);
        let output = runner::run(&mut cmd, ctx.timeout)?;
        if !output.success {
            // dpkg-query exits 1 for packages it has never heard of
            return Ok(None);
        }
        Ok(parse_status(&output.stdout_str()))
    }

    /// Version apt would install for `latest`
    fn candidate_version(&self, name: &str, ctx: &ApplyContext) -> Result<Option<String>> {
        let mut cmd = Command::new(&self.tools.apt_cache);
        cmd.args(["policy", name]);
        let output = runner::run(&mut cmd, ctx.timeout)?;
        if !output.success {
            return Err(package_error(name, &output));
        }
        Ok(parse_candidate(&output.stdout_str()))
    }

    fn apt_get(&self, spec: &PackageSpec, ctx: &ApplyContext) -> Result<()> {
        let mut cmd = Command::new(&self.tools.apt_get);
        cmd.env("DEBIAN_FRONTEND", "noninteractive").arg("-y");
        match &spec.ensure {
            PackageEnsure::Absent => {
                cmd.args(["remove", &spec.name]);
            }
            PackageEnsure::Present | PackageEnsure::Latest => {
                cmd.args(["-o", "Dpkg::Options::=--force-confold", "install", &spec.name]);
            }
            PackageEnsure::Version(version) => {
                cmd.args([
                    "-o",
                    "Dpkg::Options::=--force-confold",
                    "--allow-downgrades",
                    "install",
                ]);
                cmd.arg(format!("{}={version}", spec.name));
            }
        }

        let output = runner::run(&mut cmd, ctx.timeout)?;
        if output.success {
            Ok(())
        } else {
            Err(package_error(&spec.name, &output))
        }
    }
}

impl Provider for PackageProvider {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Package
    }

    fn current_state(&self, resource: &Resource, ctx: &ApplyContext) -> Result<ResourceState> {
        let spec = resource.as_package()?;
        Ok(match self.installed_version(&spec.name, ctx)? {
            Some(version) => ResourceState::Present {
                details: Some(version),
            },
            None => ResourceState::Absent,
        })
    }

    fn desired_state(&self, resource: &Resource) -> Result<ResourceState> {
        Ok(match &resource.as_package()?.ensure {
            PackageEnsure::Present => ResourceState::Present { details: None },
            PackageEnsure::Absent => ResourceState::Absent,
            PackageEnsure::Latest => ResourceState::Present {
                details: Some("latest".to_string()),
            },
            PackageEnsure::Version(v) => ResourceState::Present {
                details: Some(v.clone()),
            },
        })
    }

    fn needs_apply(&self, resource: &Resource, ctx: &ApplyContext) -> Result<bool> {
        let spec = resource.as_package()?;
        let installed = self.installed_version(&spec.name, ctx)?;
        Ok(match (&spec.ensure, installed) {
            (PackageEnsure::Absent, installed) => installed.is_some(),
            (_, None) => true,
            (PackageEnsure::Present, Some(_)) => false,
            (PackageEnsure::Version(wanted), Some(have)) => *wanted != have,
            (PackageEnsure::Latest, Some(have)) => {
                match self.candidate_version(&spec.name, ctx)? {
                    Some(candidate) => candidate != have,
                    None => false,
                }
            }
        })
    }

    fn apply(&self, resource: &Resource, ctx: &ApplyContext) -> Result<()> {
        let spec = resource.as_package()?;
        with_retry(&self.retry, &resource.id().to_string(), || {
            self.apt_get(spec, ctx)
        })
    }
}

/// `install ok installed 6.0.13-1` → `Some("6.0.13-1")`
fn parse_status(output: &str) -> Option<String> {
    let rest = output.trim().strip_prefix("install ok installed")?;
    let version = rest.trim();
    (!version.is_empty()).then(|| version.to_string())
}

fn parse_candidate(policy: &str) -> Option<String> {
    policy
        .lines()
        .find_map(|line| line.trim().strip_prefix("Candidate:"))
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != "(none)")
        .map(str::to_string)
}

fn package_error(name: &str, output: &CommandOutput) -> Error {
    let stderr = output.combined();
    if NETWORK_MARKERS.iter().any(|m| stderr.contains(m)) {
        Error::Network {
            url: name.to_string(),
            message: stderr,
        }
    } else {
        Error::PackageManager {
            package: name.to_string(),
            code: output.code,
            stderr,
        }
    }
}
