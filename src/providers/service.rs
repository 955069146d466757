//! SysV service provider
//!
//! Drives services through `service <name> start|stop|restart|status`.

use declarative::{
    ApplyContext, Error, Provider, Resource, ResourceKind, ResourceState, Result, ServiceEnsure,
};
use std::path::PathBuf;
use std::process::Command;

use crate::runner;

pub struct ServiceProvider {
    command: PathBuf,
}

impl ServiceProvider {
    pub fn new() -> Self {
        Self::with_command("service")
    }

    /// Use another binary in place of `service`
    pub fn with_command(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn control(&self, name: &str, action: &str, ctx: &ApplyContext) -> Result<()> {
        let output = self.invoke(name, action, ctx)?;
        if output.success {
            log::debug!("service {name} {action}: ok");
            Ok(())
        } else {
            Err(Error::ServiceControl {
                service: name.to_string(),
                action: action.to_string(),
                message: output.combined(),
            })
        }
    }

    fn invoke(
        &self,
        name: &str,
        action: &str,
        ctx: &ApplyContext,
    ) -> Result<declarative::CommandOutput> {
        let mut cmd = Command::new(&self.command);
        cmd.args([name, action]);
        runner::run(&mut cmd, ctx.timeout).map_err(|e| match e {
            Error::Exec { output, .. } => Error::ServiceControl {
                service: name.to_string(),
                action: action.to_string(),
                message: output,
            },
            other => other,
        })
    }
}

impl Default for ServiceProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider for ServiceProvider {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Service
    }

    fn current_state(&self, resource: &Resource, ctx: &ApplyContext) -> Result<ResourceState> {
        let spec = resource.as_service()?;
        let status = self.invoke(&spec.name, "status", ctx)?;
        Ok(if status.success {
            ResourceState::Running
        } else {
            ResourceState::Stopped
        })
    }

    fn desired_state(&self, resource: &Resource) -> Result<ResourceState> {
        Ok(match resource.as_service()?.ensure {
            ServiceEnsure::Running => ResourceState::Running,
            ServiceEnsure::Stopped => ResourceState::Stopped,
        })
    }

    fn apply(&self, resource: &Resource, ctx: &ApplyContext) -> Result<()> {
        let spec = resource.as_service()?;
        let action = match spec.ensure {
            ServiceEnsure::Running => "start",
            ServiceEnsure::Stopped => "stop",
        };
        self.control(&spec.name, action, ctx)
    }

    /// Restart a service that should be running; leave a stopped one alone
    fn restart(&self, resource: &Resource, ctx: &ApplyContext) -> Result<bool> {
        let spec = resource.as_service()?;
        if spec.ensure == ServiceEnsure::Stopped {
            log::debug!("{}: stays stopped, not restarting", resource.id());
            return Ok(false);
        }
        self.control(&spec.name, "restart", ctx)?;
        Ok(true)
    }
}
