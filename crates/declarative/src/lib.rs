//! # Declarative
//!
//! A framework for declarative resource management.
//!
//! This crate provides the core abstractions for declaring desired state,
//! detecting current state, and converging a host to match.
//!
//! ## Core Concepts
//!
//! - **Resource**: A typed declaration (package, file, exec, service) with a
//!   unique [`ResourceId`]
//! - **ResourceGraph**: Resources plus `requires` and `notifies` edges
//! - **Provider**: Observes and changes one kind of resource on the host
//! - **ConvergenceEngine**: Applies a graph in dependency order, then fires
//!   restarts for notified resources
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     ApplyOptions, ConvergenceEngine, FileSpec, PackageEnsure, Resource,
//!     ResourceGraph, ServiceEnsure,
//! };
//!
//! let mut graph = ResourceGraph::new();
//! let pkg = graph.declare(Resource::package("varnish", PackageEnsure::Present))?;
//! let conf = graph.declare(Resource::file(
//!     FileSpec::new("/etc/default/varnish").content("START=yes\n"),
//! ))?;
//! let svc = graph.declare(Resource::service("varnish", ServiceEnsure::Running))?;
//! graph.require(&conf, &pkg)?;
//! graph.require(&svc, &conf)?;
//! graph.notify(&conf, &svc)?;
//!
//! let mut engine = ConvergenceEngine::new(providers, ApplyOptions::default());
//! let report = engine.apply(&graph)?;
//! assert!(report.is_success());
//! ```
//!
//! ## Provider Traits
//!
//! - [`Provider`]: Per-kind strategy, looked up through [`Providers`]
//! - [`ProgressCallback`]: Receives progress updates
//!
//! This allows the crate to be used without hard dependencies on
//! specific package managers, init systems or UI frameworks.

pub mod context;
pub mod diff;
pub mod engine;
pub mod error;
pub mod graph;
pub mod provider;
pub mod report;
pub mod resource;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use context::{ApplyContext, NoProgress, ProgressCallback};
pub use diff::{DiffSummary, ResourceDiff, compute_diffs, group_by_kind};
pub use engine::ConvergenceEngine;
pub use error::{Error, ErrorCategory, Result};
pub use graph::{DependencyEdge, EdgeKind, ResourceGraph};
pub use provider::{Provider, Providers};
pub use report::ConvergenceReport;
pub use resource::{
    ExecGuard, ExecSpec, FileContent, FileEnsure, FileSpec, PackageEnsure, PackageSpec, Resource,
    ResourceSpec, ServiceEnsure, ServiceSpec,
};
pub use types::{
    ApplyOptions, CommandOutput, ConvergenceResult, ConvergenceSummary, Phase, ResourceId,
    ResourceKind, ResourceState,
};
