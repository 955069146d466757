//! Provider trait and per-kind dispatch
//!
//! A provider knows how to observe and change one kind of OS resource.
//! The engine never matches on resource kinds itself; it asks
//! [`Providers::for_kind`] and talks to the trait.

use crate::context::ApplyContext;
use crate::error::Result;
use crate::resource::Resource;
use crate::types::{ResourceKind, ResourceState};

/// Strategy for converging one kind of resource
///
/// # Example
///
/// ```ignore
/// use declarative::{ApplyContext, Provider, Resource, ResourceKind, ResourceState, Result};
///
/// struct AlwaysRunning;
///
/// impl Provider for AlwaysRunning {
///     fn kind(&self) -> ResourceKind {
///         ResourceKind::Service
///     }
///
///     fn current_state(&self, _: &Resource, _: &ApplyContext) -> Result<ResourceState> {
///         Ok(ResourceState::Running)
///     }
///
///     fn desired_state(&self, resource: &Resource) -> Result<ResourceState> {
///         resource.as_service()?;
///         Ok(ResourceState::Running)
///     }
///
///     fn apply(&self, _: &Resource, _: &ApplyContext) -> Result<()> {
///         Ok(())
///     }
/// }
/// ```
pub trait Provider: Send + Sync {
    /// The resource kind this provider handles
    fn kind(&self) -> ResourceKind;

    /// Detect the current state of this resource on the host
    fn current_state(&self, resource: &Resource, ctx: &ApplyContext) -> Result<ResourceState>;

    /// The state the declaration asks for
    ///
    /// Fallible because some desired states need I/O to compute, e.g. the
    /// hash of a file copied from a source.
    fn desired_state(&self, resource: &Resource) -> Result<ResourceState>;

    /// Check if the resource needs changes to reach desired state
    ///
    /// Default implementation compares current and desired states.
    fn needs_apply(&self, resource: &Resource, ctx: &ApplyContext) -> Result<bool> {
        let current = self.current_state(resource, ctx)?;
        let desired = self.desired_state(resource)?;
        Ok(current != desired)
    }

    /// Apply changes to reach the desired state
    fn apply(&self, resource: &Resource, ctx: &ApplyContext) -> Result<()>;

    /// React to a notification from a changed resource
    ///
    /// Returns whether anything was done. The default re-applies the
    /// resource; services override this to restart unconditionally.
    fn restart(&self, resource: &Resource, ctx: &ApplyContext) -> Result<bool> {
        self.apply(resource, ctx)?;
        Ok(true)
    }
}

/// Exactly one provider per resource kind
pub struct Providers {
    exec: Box<dyn Provider>,
    file: Box<dyn Provider>,
    package: Box<dyn Provider>,
    service: Box<dyn Provider>,
}

impl Providers {
    pub fn new(
        exec: impl Provider + 'static,
        file: impl Provider + 'static,
        package: impl Provider + 'static,
        service: impl Provider + 'static,
    ) -> Self {
        debug_assert_eq!(exec.kind(), ResourceKind::Exec);
        debug_assert_eq!(file.kind(), ResourceKind::File);
        debug_assert_eq!(package.kind(), ResourceKind::Package);
        debug_assert_eq!(service.kind(), ResourceKind::Service);
        Self {
            exec: Box::new(exec),
            file: Box::new(file),
            package: Box::new(package),
            service: Box::new(service),
        }
    }

    /// The single dispatch point from resource kind to provider
    pub fn for_kind(&self, kind: ResourceKind) -> &dyn Provider {
        match kind {
            ResourceKind::Exec => self.exec.as_ref(),
            ResourceKind::File => self.file.as_ref(),
            ResourceKind::Package => self.package.as_ref(),
            ResourceKind::Service => self.service.as_ref(),
        }
    }

    pub fn for_resource(&self, resource: &Resource) -> &dyn Provider {
        self.for_kind(resource.kind())
    }
}
