//! In-memory host used by the engine and diff tests

use crate::context::ApplyContext;
use crate::error::{Error, Result};
use crate::provider::{Provider, Providers};
use crate::resource::Resource;
use crate::types::{ResourceId, ResourceKind, ResourceState};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct HostState {
    in_sync: HashSet<ResourceId>,
    fail_apply: HashSet<ResourceId>,
    timeout_apply: HashSet<ResourceId>,
    fail_restart: HashSet<ResourceId>,
    calls: Vec<(&'static str, ResourceId)>,
}

/// Shared fake host; every provider it hands out sees the same state
#[derive(Clone, Default)]
pub(crate) struct FakeHost {
    inner: Arc<Mutex<HostState>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn providers(&self) -> Providers {
        Providers::new(
            self.provider(ResourceKind::Exec),
            self.provider(ResourceKind::File),
            self.provider(ResourceKind::Package),
            self.provider(ResourceKind::Service),
        )
    }

    fn provider(&self, kind: ResourceKind) -> FakeProvider {
        FakeProvider {
            kind,
            host: self.clone(),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut HostState) -> T) -> T {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn set_in_sync(&self, id: &ResourceId) {
        self.with(|s| s.in_sync.insert(id.clone()));
    }

    pub fn fail_apply(&self, id: &ResourceId) {
        self.with(|s| s.fail_apply.insert(id.clone()));
    }

    /// `apply` on `id` hits the process time limit
    pub fn fail_timeout(&self, id: &ResourceId) {
        self.with(|s| s.timeout_apply.insert(id.clone()));
    }

    pub fn fail_restart(&self, id: &ResourceId) {
        self.with(|s| s.fail_restart.insert(id.clone()));
    }

    pub fn calls(&self) -> Vec<(&'static str, ResourceId)> {
        self.with(|s| s.calls.clone())
    }

    pub fn count(&self, op: &str, id: &ResourceId) -> usize {
        self.with(|s| {
            s.calls
                .iter()
                .filter(|(o, i)| *o == op && i == id)
                .count()
        })
    }

    pub fn clear_calls(&self) {
        self.with(|s| s.calls.clear());
    }
}

struct FakeProvider {
    kind: ResourceKind,
    host: FakeHost,
}

impl Provider for FakeProvider {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn current_state(&self, resource: &Resource, _ctx: &ApplyContext) -> Result<ResourceState> {
        let id = resource.id().clone();
        Ok(self.host.with(|s| {
            s.calls.push(("query", id.clone()));
            if s.in_sync.contains(&id) {
                ResourceState::Present {
                    details: Some("ok".into()),
                }
            } else {
                ResourceState::Absent
            }
        }))
    }

    fn desired_state(&self, _resource: &Resource) -> Result<ResourceState> {
        Ok(ResourceState::Present {
            details: Some("ok".into()),
        })
    }

    fn apply(&self, resource: &Resource, _ctx: &ApplyContext) -> Result<()> {
        let id = resource.id().clone();
        self.host.with(|s| {
            s.calls.push(("apply", id.clone()));
            if s.fail_apply.contains(&id) {
                return Err(Error::Exec {
                    command: id.to_string(),
                    code: Some(1),
                    output: "boom".into(),
                });
            }
            if s.timeout_apply.contains(&id) {
                return Err(Error::Timeout {
                    command: id.to_string(),
                    after: Duration::from_secs(300),
                });
            }
            s.in_sync.insert(id);
            Ok(())
        })
    }

    fn restart(&self, resource: &Resource, _ctx: &ApplyContext) -> Result<bool> {
        let id = resource.id().clone();
        self.host.with(|s| {
            s.calls.push(("restart", id.clone()));
            if s.fail_restart.contains(&id) {
                return Err(Error::ServiceControl {
                    service: id.name.clone(),
                    action: "restart".into(),
                    message: "boom".into(),
                });
            }
            Ok(true)
        })
    }
}
