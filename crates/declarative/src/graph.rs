//! Resource graph - declarations plus `requires` / `notifies` edges
//!
//! `requires` edges order the apply pass and must form a DAG. `notifies`
//! edges only carry restart triggers and are never used for ordering, so a
//! caller that wants "apply A before B and restart B when A changes" declares
//! both edges.

use crate::error::{Error, Result};
use crate::resource::Resource;
use crate::types::ResourceId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Requires,
    Notifies,
}

/// A directed edge, as declared at the `from` resource
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DependencyEdge {
    pub from: ResourceId,
    pub to: ResourceId,
    pub kind: EdgeKind,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Grey,
    Black,
}

/// Declared resources and the edges between them
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    resources: BTreeMap<ResourceId, Resource>,
    /// from → resources that must be applied before `from`
    requires: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
    /// from → resources restarted when `from` changes
    notifies: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a resource; identities must be unique
    pub fn declare(&mut self, resource: Resource) -> Result<ResourceId> {
        let id = resource.id().clone();
        if self.resources.contains_key(&id) {
            return Err(Error::DuplicateResource { id });
        }
        log::trace!("declared {id}");
        self.resources.insert(id.clone(), resource);
        Ok(id)
    }

    /// `from` requires `to`: `to` is applied first
    pub fn require(&mut self, from: &ResourceId, to: &ResourceId) -> Result<()> {
        self.ensure_known(from)?;
        self.ensure_known(to)?;
        self.requires
            .entry(from.clone())
            .or_default()
            .insert(to.clone());
        Ok(())
    }

    /// `from` notifies `to`: a change on `from` restarts `to`
    pub fn notify(&mut self, from: &ResourceId, to: &ResourceId) -> Result<()> {
        self.ensure_known(from)?;
        self.ensure_known(to)?;
        self.notifies
            .entry(from.clone())
            .or_default()
            .insert(to.clone());
        Ok(())
    }

    fn ensure_known(&self, id: &ResourceId) -> Result<()> {
        if self.resources.contains_key(id) {
            Ok(())
        } else {
            Err(Error::UnknownResource { id: id.clone() })
        }
    }

    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// Like [`get`](Self::get), but an unknown id is an error
    pub fn resource(&self, id: &ResourceId) -> Result<&Resource> {
        self.resources
            .get(id)
            .ok_or_else(|| Error::UnknownResource { id: id.clone() })
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// All resources, sorted by `(kind, name)`
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn requirements_of(&self, id: &ResourceId) -> impl Iterator<Item = &ResourceId> {
        self.requires.get(id).into_iter().flatten()
    }

    pub fn notify_targets(&self, id: &ResourceId) -> impl Iterator<Item = &ResourceId> {
        self.notifies.get(id).into_iter().flatten()
    }

    /// Every edge, requires first, each group sorted
    pub fn edges(&self) -> Vec<DependencyEdge> {
        let mut edges = Vec::new();
        for (kind, map) in [
            (EdgeKind::Requires, &self.requires),
            (EdgeKind::Notifies, &self.notifies),
        ] {
            for (from, targets) in map {
                for to in targets {
                    edges.push(DependencyEdge {
                        from: from.clone(),
                        to: to.clone(),
                        kind,
                    });
                }
            }
        }
        edges
    }

    /// Fail if the requires-subgraph contains a cycle
    ///
    /// Depth-first search with grey/black marks; the error lists the nodes of
    /// the first cycle found, starting at the node closest to the search root.
    pub fn validate(&self) -> Result<()> {
        let mut marks: HashMap<&ResourceId, Mark> = HashMap::new();
        let mut path: Vec<&ResourceId> = Vec::new();
        for id in self.resources.keys() {
            if !marks.contains_key(id) {
                self.visit(id, &mut marks, &mut path)?;
            }
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        id: &'a ResourceId,
        marks: &mut HashMap<&'a ResourceId, Mark>,
        path: &mut Vec<&'a ResourceId>,
    ) -> Result<()> {
        marks.insert(id, Mark::Grey);
        path.push(id);

        for dep in self.requirements_of(id) {
            match marks.get(dep) {
                Some(Mark::Grey) => {
                    let start = path.iter().position(|p| *p == dep).unwrap_or(0);
                    let cycle = path[start..].iter().map(|p| (*p).clone()).collect();
                    return Err(Error::CyclicDependency { cycle });
                }
                Some(Mark::Black) => {}
                None => self.visit(dep, marks, path)?,
            }
        }

        path.pop();
        marks.insert(id, Mark::Black);
        Ok(())
    }

    /// Apply order: every resource after everything it requires
    ///
    /// Kahn's algorithm with a sorted ready set, so resources with no
    /// ordering between them come out by `(kind, name)`.
    pub fn topological_order(&self) -> Result<Vec<ResourceId>> {
        self.validate()?;

        let (mut pending, dependents) = self.in_degrees();
        let mut ready: BTreeSet<&ResourceId> = pending
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.resources.len());

        while let Some(id) = ready.pop_first() {
            order.push(id.clone());
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(n) = pending.get_mut(dependent) {
                    *n -= 1;
                    if *n == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        Ok(order)
    }

    /// Resources grouped into dependency levels
    ///
    /// Everything in wave `n` requires only resources in waves `< n`, so a
    /// wave can be applied concurrently.
    pub fn waves(&self) -> Result<Vec<Vec<ResourceId>>> {
        self.validate()?;

        let (mut pending, dependents) = self.in_degrees();
        let mut current: Vec<&ResourceId> = pending
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut waves = Vec::new();

        while !current.is_empty() {
            current.sort();
            let mut next = Vec::new();
            for id in &current {
                for dependent in dependents.get(*id).into_iter().flatten() {
                    if let Some(n) = pending.get_mut(dependent) {
                        *n -= 1;
                        if *n == 0 {
                            next.push(*dependent);
                        }
                    }
                }
            }
            waves.push(current.iter().map(|id| (*id).clone()).collect());
            current = next;
        }

        Ok(waves)
    }

    /// Unmet requirement counts, plus the reverse (to → froms) adjacency
    #[allow(clippy::type_complexity)]
    fn in_degrees(
        &self,
    ) -> (
        BTreeMap<&ResourceId, usize>,
        HashMap<&ResourceId, Vec<&ResourceId>>,
    ) {
        let mut pending: BTreeMap<&ResourceId, usize> =
            self.resources.keys().map(|id| (id, 0)).collect();
        let mut dependents: HashMap<&ResourceId, Vec<&ResourceId>> = HashMap::new();

        for (from, targets) in &self.requires {
            for to in targets {
                if let Some(n) = pending.get_mut(from) {
                    *n += 1;
                }
                dependents.entry(to).or_default().push(from);
            }
        }

        (pending, dependents)
    }
}
