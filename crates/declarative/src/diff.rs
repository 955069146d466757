//! Diff computation for resources

use crate::context::ApplyContext;
use crate::error::Result;
use crate::graph::ResourceGraph;
use crate::provider::Provider;
use crate::resource::Resource;
use crate::types::{ResourceId, ResourceKind, ResourceState};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A diff between current and desired state of a resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDiff {
    /// Resource identity
    pub id: ResourceId,
    /// Human-readable description
    pub description: String,
    /// Current state
    pub current: ResourceState,
    /// Desired state
    pub desired: ResourceState,
    /// Resources that would be restarted once this one changes
    pub notifies: Vec<ResourceId>,
}

impl ResourceDiff {
    /// Create a diff from a resource, returning None if no changes needed
    pub fn from_resource(
        provider: &dyn Provider,
        resource: &Resource,
        ctx: &ApplyContext,
    ) -> Result<Option<Self>> {
        if !provider.needs_apply(resource, ctx)? {
            return Ok(None);
        }

        Ok(Some(Self {
            id: resource.id().clone(),
            description: resource.description(),
            current: provider.current_state(resource, ctx)?,
            desired: provider.desired_state(resource)?,
            notifies: Vec::new(),
        }))
    }

    /// Check if this diff represents an addition
    pub fn is_addition(&self) -> bool {
        self.current.is_absent() && !self.desired.is_absent()
    }

    /// Check if this diff represents a removal
    pub fn is_removal(&self) -> bool {
        self.desired.is_absent() && !self.current.is_absent()
    }

    /// Check if this diff represents a modification
    pub fn is_modification(&self) -> bool {
        !self.is_addition() && !self.is_removal()
    }
}

/// Compute diffs for every resource of a graph, in apply order
///
/// Returns only resources that have differences between current and
/// desired state. Query failures are returned, not skipped.
pub fn compute_diffs(
    graph: &ResourceGraph,
    providers: &crate::provider::Providers,
    ctx: &ApplyContext,
) -> Result<Vec<ResourceDiff>> {
    let mut diffs = Vec::new();
    for id in graph.topological_order()? {
        let resource = graph.resource(&id)?;
        let provider = providers.for_resource(resource);
        if let Some(mut diff) = ResourceDiff::from_resource(provider, resource, ctx)? {
            diff.notifies = graph.notify_targets(&id).cloned().collect();
            diffs.push(diff);
        }
    }
    Ok(diffs)
}

/// Diff summary statistics
#[derive(Debug, Clone, Default)]
pub struct DiffSummary {
    /// Number of resources to add
    pub additions: usize,
    /// Number of resources to remove
    pub removals: usize,
    /// Number of resources to modify
    pub modifications: usize,
    /// Distinct resources that would be restarted
    pub restarts: usize,
}

impl DiffSummary {
    /// Create a summary from a list of diffs
    pub fn from_diffs(diffs: &[ResourceDiff]) -> Self {
        let mut summary = Self::default();
        let mut restarts = BTreeSet::new();
        for diff in diffs {
            if diff.is_addition() {
                summary.additions += 1;
            } else if diff.is_removal() {
                summary.removals += 1;
            } else {
                summary.modifications += 1;
            }
            restarts.extend(diff.notifies.iter());
        }
        summary.restarts = restarts.len();
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.additions + self.removals + self.modifications
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Group diffs by resource kind
pub fn group_by_kind(diffs: &[ResourceDiff]) -> BTreeMap<ResourceKind, Vec<&ResourceDiff>> {
    let mut groups: BTreeMap<ResourceKind, Vec<&ResourceDiff>> = BTreeMap::new();
    for diff in diffs {
        groups.entry(diff.id.kind).or_default().push(diff);
    }
    groups
}
