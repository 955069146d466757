//! Apply context and progress callbacks
//!
//! These let the engine report progress without depending on a specific
//! terminal UI.

use crate::types::{ApplyOptions, ConvergenceResult, ResourceId};
use std::time::Duration;

/// Progress callback for apply operations
///
/// Implement this trait to receive progress updates during convergence.
pub trait ProgressCallback: Send {
    /// Called once before the main pass
    fn on_start(&mut self, total: usize, dry_run: bool);

    /// Called when a resource is about to be reconciled
    fn on_resource_start(&mut self, id: &ResourceId, description: &str);

    /// Called when a resource's main-pass result is known
    fn on_resource_complete(&mut self, id: &ResourceId, result: &ConvergenceResult);

    /// Called after a notify-triggered restart
    fn on_restart(&mut self, id: &ResourceId);

    /// Called once after the run, successful or not
    fn on_finish(&mut self);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_start(&mut self, _total: usize, _dry_run: bool) {}
    fn on_resource_start(&mut self, _id: &ResourceId, _description: &str) {}
    fn on_resource_complete(&mut self, _id: &ResourceId, _result: &ConvergenceResult) {}
    fn on_restart(&mut self, _id: &ResourceId) {}
    fn on_finish(&mut self) {}
}

/// Context passed to provider operations
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyContext {
    /// Whether this is a dry run (no actual changes)
    pub dry_run: bool,
    /// Budget for each external process a provider spawns
    pub timeout: Option<Duration>,
}

impl ApplyContext {
    pub fn new(dry_run: bool, timeout: Option<Duration>) -> Self {
        Self { dry_run, timeout }
    }
}

impl From<&ApplyOptions> for ApplyContext {
    fn from(opts: &ApplyOptions) -> Self {
        Self::new(opts.dry_run, opts.timeout)
    }
}
