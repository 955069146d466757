//! Per-run convergence report

use crate::types::{ConvergenceResult, ConvergenceSummary, Phase, ResourceId};
use std::collections::BTreeMap;

/// Everything one apply pass learned about each resource
#[derive(Debug, Clone, Default)]
pub struct ConvergenceReport {
    /// Main-pass visiting order
    pub order: Vec<ResourceId>,
    /// Resources that received `restart()` after the main pass
    pub restarted: Vec<ResourceId>,
    /// Dry run only: resources a real run would restart
    pub pending_restarts: Vec<ResourceId>,
    results: BTreeMap<ResourceId, ConvergenceResult>,
    phases: BTreeMap<ResourceId, Phase>,
}

impl ConvergenceReport {
    pub(crate) fn new(order: Vec<ResourceId>) -> Self {
        let phases = order.iter().map(|id| (id.clone(), Phase::Pending)).collect();
        Self {
            order,
            phases,
            ..Self::default()
        }
    }

    /// Move `id` to `next`, ignoring illegal transitions
    pub(crate) fn advance(&mut self, id: &ResourceId, next: Phase) {
        let current = self.phases.get(id).copied().unwrap_or(Phase::Pending);
        if current.can_advance_to(next) {
            self.phases.insert(id.clone(), next);
        } else {
            log::warn!("{id}: illegal phase transition {current:?} -> {next:?}");
        }
    }

    pub(crate) fn record(&mut self, id: &ResourceId, result: ConvergenceResult) {
        self.results.insert(id.clone(), result);
    }

    /// Mark every resource without a result as failed, blaming `cause`
    pub(crate) fn fail_unvisited(&mut self, cause: &ResourceId) {
        let unvisited: Vec<ResourceId> = self
            .order
            .iter()
            .filter(|id| !self.results.contains_key(*id))
            .cloned()
            .collect();
        for id in unvisited {
            self.advance(&id, Phase::Failed);
            self.record(
                &id,
                ConvergenceResult::Failed {
                    reason: format!("dependency not applied: {cause}"),
                },
            );
        }
    }

    /// Result for one resource, if it was reached
    pub fn result(&self, id: &ResourceId) -> Option<&ConvergenceResult> {
        self.results.get(id)
    }

    /// Final lifecycle phase for one resource
    pub fn phase(&self, id: &ResourceId) -> Option<Phase> {
        self.phases.get(id).copied()
    }

    /// Results in main-pass order
    pub fn results(&self) -> impl Iterator<Item = (&ResourceId, &ConvergenceResult)> {
        self.order
            .iter()
            .filter_map(|id| self.results.get(id).map(|r| (id, r)))
    }

    pub fn summary(&self) -> ConvergenceSummary {
        let mut summary = ConvergenceSummary::default();
        for result in self.results.values() {
            summary.add_result(result);
        }
        summary.restarted = self.restarted.len();
        summary
    }

    /// True only if every resource is unchanged, changed or skipped
    pub fn is_success(&self) -> bool {
        self.summary().is_success() && self.results.len() == self.order.len()
    }
}
