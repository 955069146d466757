//! Core types for declarative resource management

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The closed set of resource kinds the engine knows how to converge
///
/// Variant order is alphabetical so that the derived `Ord` matches a
/// lexicographic sort on the kind name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Exec,
    File,
    Package,
    Service,
}

impl ResourceKind {
    /// Lowercase name, as used in config and filters
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exec => "exec",
            Self::File => "file",
            Self::Package => "package",
            Self::Service => "service",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Self::Exec => "Exec",
            Self::File => "File",
            Self::Package => "Package",
            Self::Service => "Service",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Identity of a resource within a graph: `(kind, name)`
///
/// Displayed as `Kind[name]`, e.g. `Service[varnish]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn exec(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Exec, name)
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self::new(ResourceKind::File, path)
    }

    pub fn package(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Package, name)
    }

    pub fn service(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Service, name)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind, self.name)
    }
}

/// Current or desired state of a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceState {
    /// Resource exists/is configured
    Present { details: Option<String> },
    /// Resource does not exist/is not configured
    Absent,
    /// Service is active
    Running,
    /// Service is inactive
    Stopped,
}

impl ResourceState {
    /// Check if state represents absence
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present { details: Some(d) } => write!(f, "present ({d})"),
            Self::Present { details: None } => f.write_str("present"),
            Self::Absent => f.write_str("absent"),
            Self::Running => f.write_str("running"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// Outcome of converging one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceResult {
    /// Already in the desired state
    Unchanged,
    /// Provider applied a change
    Changed,
    /// Provider failed, or a failure elsewhere stopped the run first
    Failed { reason: String },
    /// Drift detected but not applied (dry run)
    Skipped { reason: String },
}

impl ConvergenceResult {
    /// Check if the result represents success (no failure)
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// Check if the result represents a change
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Changed)
    }

    /// Short label for reports
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Changed => "changed",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// Where a resource is in its lifecycle during one apply pass
///
/// ```text
/// Pending → Querying → Unchanged ──┐
///                    ↘ Applying → Applied ──→ Restarting → Applied
///                               ↘ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Pending,
    Querying,
    Unchanged,
    Applying,
    Applied,
    Restarting,
    Failed,
    /// Drift found during a dry run; nothing applied
    Skipped,
}

impl Phase {
    /// Whether `next` is a legal successor of `self`
    pub fn can_advance_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Querying)
                | (Self::Pending, Self::Failed)
                | (Self::Querying, Self::Unchanged)
                | (Self::Querying, Self::Applying)
                | (Self::Querying, Self::Skipped)
                | (Self::Querying, Self::Failed)
                | (Self::Applying, Self::Applied)
                | (Self::Applying, Self::Failed)
                | (Self::Unchanged, Self::Restarting)
                | (Self::Applied, Self::Restarting)
                | (Self::Restarting, Self::Applied)
                | (Self::Restarting, Self::Failed)
        )
    }
}

/// Summary of convergence results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceSummary {
    pub unchanged: usize,
    pub changed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub restarted: usize,
}

impl ConvergenceSummary {
    /// Check if convergence was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Total number of resources accounted for
    pub fn total(&self) -> usize {
        self.unchanged + self.changed + self.failed + self.skipped
    }

    /// Add a result to the summary
    pub fn add_result(&mut self, result: &ConvergenceResult) {
        match result {
            ConvergenceResult::Unchanged => self.unchanged += 1,
            ConvergenceResult::Changed => self.changed += 1,
            ConvergenceResult::Failed { .. } => self.failed += 1,
            ConvergenceResult::Skipped { .. } => self.skipped += 1,
        }
    }
}

/// Options for an apply run
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Detect drift but change nothing
    pub dry_run: bool,
    /// Resources applied concurrently within one dependency wave
    pub jobs: usize,
    /// Upper bound for any external process a provider spawns
    pub timeout: Option<Duration>,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            jobs: 1,
            timeout: Some(Duration::from_secs(300)),
        }
    }
}

/// Output from an external command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub code: Option<i32>,
    pub success: bool,
}

impl CommandOutput {
    /// Get stdout as a string
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a string
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// Stdout followed by stderr, trimmed
    pub fn combined(&self) -> String {
        let stdout = self.stdout_str();
        let stderr = self.stderr_str();
        match (stdout.trim(), stderr.trim()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{out}\n{err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_display() {
        assert_eq!(ResourceId::service("varnish").to_string(), "Service[varnish]");
        assert_eq!(
            ResourceId::file("/etc/default/varnish").to_string(),
            "File[/etc/default/varnish]"
        );
    }

    #[test]
    fn test_resource_id_orders_by_kind_then_name() {
        let mut ids = vec![
            ResourceId::service("a"),
            ResourceId::package("varnish"),
            ResourceId::file("/b"),
            ResourceId::file("/a"),
            ResourceId::exec("z"),
        ];
        ids.sort();
        let names: Vec<String> = ids.iter().map(ToString::to_string).collect();
        assert_eq!(
            names,
            vec![
                "Exec[z]",
                "File[/a]",
                "File[/b]",
                "Package[varnish]",
                "Service[a]"
            ]
        );
    }

    #[test]
    fn test_phase_transitions() {
        assert!(Phase::Pending.can_advance_to(Phase::Querying));
        assert!(Phase::Querying.can_advance_to(Phase::Applying));
        assert!(Phase::Applied.can_advance_to(Phase::Restarting));
        assert!(Phase::Unchanged.can_advance_to(Phase::Restarting));
        assert!(Phase::Restarting.can_advance_to(Phase::Applied));
        assert!(!Phase::Pending.can_advance_to(Phase::Applied));
        assert!(!Phase::Failed.can_advance_to(Phase::Restarting));
        assert!(!Phase::Unchanged.can_advance_to(Phase::Applying));
    }

    #[test]
    fn test_summary_add_result() {
        let mut summary = ConvergenceSummary::default();
        summary.add_result(&ConvergenceResult::Changed);
        summary.add_result(&ConvergenceResult::Unchanged);
        summary.add_result(&ConvergenceResult::Failed {
            reason: "boom".into(),
        });
        assert_eq!(summary.total(), 3);
        assert!(!summary.is_success());
    }

    #[test]
    fn test_command_output_combined() {
        let output = CommandOutput {
            stdout: b"out\n".to_vec(),
            stderr: b"err\n".to_vec(),
            code: Some(1),
            success: false,
        };
        assert_eq!(output.combined(), "out\nerr");

        let quiet = CommandOutput {
            stderr: b"only err".to_vec(),
            ..Default::default()
        };
        assert_eq!(quiet.combined(), "only err");
    }
}
