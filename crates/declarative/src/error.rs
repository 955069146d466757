//! Error types for graph construction and convergence.
//!
//! Graph errors (duplicate, unknown, cyclic) are raised before any provider
//! touches the host. Provider errors are raised during apply; the engine
//! wraps the first one in [`Error::Aborted`] together with the partial report.

use crate::report::ConvergenceReport;
use crate::types::{ResourceId, ResourceKind};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Categories of errors, used for retry decisions and exit reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid resource graph
    Graph,
    /// Transient network failure (retryable)
    Network,
    /// External process exceeded its time budget
    Timeout,
    /// A provider could not converge its resource
    Provider,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Graph => "Invalid resource graph",
            Self::Network => "Network connectivity issue",
            Self::Timeout => "Operation timed out",
            Self::Provider => "Resource could not be converged",
        }
    }
}

/// Errors raised while building or converging a resource graph
#[derive(Debug, Error)]
pub enum Error {
    /// A resource with the same `(kind, name)` is already declared
    #[error("duplicate declaration of {id}")]
    DuplicateResource { id: ResourceId },

    /// An edge references an undeclared resource
    #[error("unknown resource {id}")]
    UnknownResource { id: ResourceId },

    /// The requires-subgraph contains a cycle
    #[error("dependency cycle: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<ResourceId> },

    /// A provider was handed a resource of another kind
    #[error("{id} is not a {expected} resource")]
    KindMismatch {
        id: ResourceId,
        expected: ResourceKind,
    },

    /// Package manager exited non-zero
    #[error("package manager failed for {package} (exit {}): {stderr}", format_code(.code))]
    PackageManager {
        package: String,
        code: Option<i32>,
        stderr: String,
    },

    /// File could not be written, copied, chmod'ed or chown'ed
    #[error("failed to write {}: {message}", .path.display())]
    FileWrite { path: PathBuf, message: String },

    /// Command exited non-zero
    #[error("command `{command}` failed (exit {}): {output}", format_code(.code))]
    Exec {
        command: String,
        code: Option<i32>,
        output: String,
    },

    /// Service manager failed to start, stop, restart or query a service
    #[error("service {service} {action} failed: {message}")]
    ServiceControl {
        service: String,
        action: String,
        message: String,
    },

    /// External process exceeded its timeout and was killed
    #[error("`{command}` timed out after {}s", .after.as_secs())]
    Timeout { command: String, after: Duration },

    /// Download or package fetch failed for a network reason
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// Apply stopped at the first provider failure
    #[error("apply aborted at {resource}: {source}")]
    Aborted {
        resource: ResourceId,
        #[source]
        source: Box<Error>,
        report: Box<ConvergenceReport>,
    },
}

impl Error {
    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::DuplicateResource { .. }
            | Error::UnknownResource { .. }
            | Error::CyclicDependency { .. }
            | Error::KindMismatch { .. } => ErrorCategory::Graph,
            Error::Network { .. } => ErrorCategory::Network,
            Error::Timeout { .. } => ErrorCategory::Timeout,
            Error::Aborted { source, .. } => source.category(),
            _ => ErrorCategory::Provider,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// The partial report carried by an aborted apply
    pub fn report(&self) -> Option<&ConvergenceReport> {
        match self {
            Error::Aborted { report, .. } => Some(report),
            _ => None,
        }
    }

    /// Wrap an I/O error for `path` as a file write failure
    pub fn file_write(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        Error::FileWrite {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

fn format_cycle(cycle: &[ResourceId]) -> String {
    let mut parts: Vec<String> = cycle.iter().map(ToString::to_string).collect();
    if let Some(first) = cycle.first() {
        parts.push(first.to_string());
    }
    parts.join(" -> ")
}

fn format_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

/// Result type for declarative operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_retryable() {
        assert!(ErrorCategory::Network.is_retryable());
        assert!(!ErrorCategory::Timeout.is_retryable());
        assert!(!ErrorCategory::Graph.is_retryable());
        assert!(!ErrorCategory::Provider.is_retryable());
    }

    #[test]
    fn test_cycle_message_closes_loop() {
        let err = Error::CyclicDependency {
            cycle: vec![ResourceId::exec("a"), ResourceId::exec("b")],
        };
        assert_eq!(
            err.to_string(),
            "dependency cycle: Exec[a] -> Exec[b] -> Exec[a]"
        );
        assert_eq!(err.category(), ErrorCategory::Graph);
    }

    #[test]
    fn test_exec_message_reports_exit_code() {
        let err = Error::Exec {
            command: "false".into(),
            code: Some(1),
            output: String::new(),
        };
        assert_eq!(err.to_string(), "command `false` failed (exit 1): ");

        let killed = Error::Exec {
            command: "sleep 10".into(),
            code: None,
            output: String::new(),
        };
        assert!(killed.to_string().contains("exit signal"));
    }

    #[test]
    fn test_aborted_inherits_category() {
        let err = Error::Aborted {
            resource: ResourceId::file("/etc/apt/varnish-cache.key"),
            source: Box::new(Error::Network {
                url: "http://example.invalid/key".into(),
                message: "dns".into(),
            }),
            report: Box::default(),
        };
        assert!(err.is_retryable());
        assert!(err.report().is_some());
    }
}
