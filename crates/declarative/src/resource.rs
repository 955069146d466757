//! Resource declarations
//!
//! A [`Resource`] is one declared unit of desired state. Each kind carries its
//! own typed specification, so providers never have to guess which
//! properties apply to them.

use crate::error::{Error, Result};
use crate::types::{ResourceId, ResourceKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Desired state of a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageEnsure {
    /// Any installed version is fine
    Present,
    /// Not installed
    Absent,
    /// The candidate version offered by the package index
    Latest,
    /// Exactly this version
    Version(String),
}

impl PackageEnsure {
    /// Parse the config spelling: `present`, `installed`, `absent`, `latest`,
    /// or a literal version string
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "" | "present" | "installed" => Self::Present,
            "absent" | "purged" => Self::Absent,
            "latest" => Self::Latest,
            version => Self::Version(version.to_string()),
        }
    }
}

impl fmt::Display for PackageEnsure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present => f.write_str("present"),
            Self::Absent => f.write_str("absent"),
            Self::Latest => f.write_str("latest"),
            Self::Version(v) => f.write_str(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    pub name: String,
    pub ensure: PackageEnsure,
}

/// Where a file's content comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    /// Content given inline (usually a rendered template)
    Literal(String),
    /// Copy of a local file
    Source(PathBuf),
    /// Downloaded over HTTP(S)
    Url(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEnsure {
    Present,
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    pub path: PathBuf,
    pub ensure: FileEnsure,
    pub content: Option<FileContent>,
    pub mode: Option<u32>,
    pub owner: Option<String>,
    pub group: Option<String>,
    /// When false, an existing file keeps its content; only metadata is managed
    pub replace: bool,
}

impl FileSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ensure: FileEnsure::Present,
            content: None,
            mode: None,
            owner: None,
            group: None,
            replace: true,
        }
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(FileContent::Literal(content.into()));
        self
    }

    pub fn source(mut self, source: impl Into<PathBuf>) -> Self {
        self.content = Some(FileContent::Source(source.into()));
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.content = Some(FileContent::Url(url.into()));
        self
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn absent(mut self) -> Self {
        self.ensure = FileEnsure::Absent;
        self
    }

    /// Write content only when the file does not exist yet
    pub fn no_replace(mut self) -> Self {
        self.replace = false;
        self
    }
}

/// Condition deciding whether an exec's command needs to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecGuard {
    /// Run only if this command exits 0
    OnlyIf(String),
    /// Run only if this command exits non-zero
    Unless(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    pub command: String,
    pub guard: Option<ExecGuard>,
}

impl ExecSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            guard: None,
        }
    }

    pub fn onlyif(mut self, guard: impl Into<String>) -> Self {
        self.guard = Some(ExecGuard::OnlyIf(guard.into()));
        self
    }

    pub fn unless(mut self, guard: impl Into<String>) -> Self {
        self.guard = Some(ExecGuard::Unless(guard.into()));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceEnsure {
    Running,
    Stopped,
}

impl ServiceEnsure {
    /// `true` → running, `false` → stopped
    pub fn from_flag(start: bool) -> Self {
        if start { Self::Running } else { Self::Stopped }
    }
}

impl fmt::Display for ServiceEnsure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("running"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub ensure: ServiceEnsure,
}

/// Kind-specific desired state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceSpec {
    Exec(ExecSpec),
    File(FileSpec),
    Package(PackageSpec),
    Service(ServiceSpec),
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Exec(_) => ResourceKind::Exec,
            Self::File(_) => ResourceKind::File,
            Self::Package(_) => ResourceKind::Package,
            Self::Service(_) => ResourceKind::Service,
        }
    }
}

/// A declared resource: identity plus desired state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    id: ResourceId,
    spec: ResourceSpec,
}

impl Resource {
    pub fn package(name: impl Into<String>, ensure: PackageEnsure) -> Self {
        let name = name.into();
        Self {
            id: ResourceId::package(name.clone()),
            spec: ResourceSpec::Package(PackageSpec { name, ensure }),
        }
    }

    /// A file resource, named by its path
    pub fn file(spec: FileSpec) -> Self {
        Self {
            id: ResourceId::file(spec.path.display().to_string()),
            spec: ResourceSpec::File(spec),
        }
    }

    /// An exec resource; `name` is its title, independent of the command
    pub fn exec(name: impl Into<String>, spec: ExecSpec) -> Self {
        Self {
            id: ResourceId::exec(name),
            spec: ResourceSpec::Exec(spec),
        }
    }

    pub fn service(name: impl Into<String>, ensure: ServiceEnsure) -> Self {
        let name = name.into();
        Self {
            id: ResourceId::service(name.clone()),
            spec: ResourceSpec::Service(ServiceSpec { name, ensure }),
        }
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn kind(&self) -> ResourceKind {
        self.id.kind
    }

    pub fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    /// Human-readable description
    pub fn description(&self) -> String {
        match &self.spec {
            ResourceSpec::Exec(e) => format!("Run `{}`", e.command),
            ResourceSpec::File(f) => match f.ensure {
                FileEnsure::Present => format!("Manage file {}", f.path.display()),
                FileEnsure::Absent => format!("Remove file {}", f.path.display()),
            },
            ResourceSpec::Package(p) => format!("Package {} ({})", p.name, p.ensure),
            ResourceSpec::Service(s) => format!("Service {} ({})", s.name, s.ensure),
        }
    }

    pub fn as_exec(&self) -> Result<&ExecSpec> {
        match &self.spec {
            ResourceSpec::Exec(spec) => Ok(spec),
            _ => Err(self.mismatch(ResourceKind::Exec)),
        }
    }

    pub fn as_file(&self) -> Result<&FileSpec> {
        match &self.spec {
            ResourceSpec::File(spec) => Ok(spec),
            _ => Err(self.mismatch(ResourceKind::File)),
        }
    }

    pub fn as_package(&self) -> Result<&PackageSpec> {
        match &self.spec {
            ResourceSpec::Package(spec) => Ok(spec),
            _ => Err(self.mismatch(ResourceKind::Package)),
        }
    }

    pub fn as_service(&self) -> Result<&ServiceSpec> {
        match &self.spec {
            ResourceSpec::Service(spec) => Ok(spec),
            _ => Err(self.mismatch(ResourceKind::Service)),
        }
    }

    fn mismatch(&self, expected: ResourceKind) -> Error {
        Error::KindMismatch {
            id: self.id.clone(),
            expected,
        }
    }
}
