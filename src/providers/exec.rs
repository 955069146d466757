//! Shell command provider
//!
//! An exec is "present" when its guard says the command has nothing left to
//! do. Without a guard it always runs.

use declarative::{
    ApplyContext, Error, ExecGuard, Provider, Resource, ResourceKind, ResourceState, Result,
};

use crate::runner;

pub struct ExecProvider;

impl ExecProvider {
    /// Whether the guard allows the command to run
    fn guard_allows(guard: Option<&ExecGuard>, ctx: &ApplyContext) -> Result<bool> {
        match guard {
            None => Ok(true),
            Some(ExecGuard::OnlyIf(check)) => Ok(runner::shell(check, ctx.timeout)?.success),
            Some(ExecGuard::Unless(check)) => Ok(!runner::shell(check, ctx.timeout)?.success),
        }
    }
}

impl Provider for ExecProvider {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Exec
    }

    fn current_state(&self, resource: &Resource, ctx: &ApplyContext) -> Result<ResourceState> {
        let spec = resource.as_exec()?;
        if Self::guard_allows(spec.guard.as_ref(), ctx)? {
            return Ok(ResourceState::Absent);
        }
        let details = match &spec.guard {
            Some(ExecGuard::OnlyIf(_)) => "onlyif guard not met",
            _ => "unless guard satisfied",
        };
        Ok(ResourceState::Present {
            details: Some(details.to_string()),
        })
    }

    fn desired_state(&self, resource: &Resource) -> Result<ResourceState> {
        resource.as_exec()?;
        Ok(ResourceState::Present { details: None })
    }

    fn needs_apply(&self, resource: &Resource, ctx: &ApplyContext) -> Result<bool> {
        Ok(self.current_state(resource, ctx)?.is_absent())
    }

    fn apply(&self, resource: &Resource, ctx: &ApplyContext) -> Result<()> {
        let spec = resource.as_exec()?;
        let output = runner::shell(&spec.command, ctx.timeout)?;
        if !output.success {
            return Err(Error::Exec {
                command: spec.command.clone(),
                code: output.code,
                output: output.combined(),
            });
        }
        log::debug!("{}: {}", resource.id(), output.stdout_str().trim());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::ExecSpec;
    use tempfile::TempDir;

    fn ctx() -> ApplyContext {
        ApplyContext::default()
    }

    #[test]
    fn test_unguarded_exec_always_runs() {
        let r = Resource::exec("noop", ExecSpec::new("true"));
        assert!(ExecProvider.needs_apply(&r, &ctx()).unwrap());
    }

    #[test]
    fn test_unless_guard() {
        let done = Resource::exec("x", ExecSpec::new("true").unless("true"));
        let todo = Resource::exec("y", ExecSpec::new("true").unless("false"));
        assert!(!ExecProvider.needs_apply(&done, &ctx()).unwrap());
        assert!(ExecProvider.needs_apply(&todo, &ctx()).unwrap());
    }

    #[test]
    fn test_onlyif_guard() {
        let todo = Resource::exec("x", ExecSpec::new("true").onlyif("true"));
        let skip = Resource::exec("y", ExecSpec::new("true").onlyif("false"));
        assert!(ExecProvider.needs_apply(&todo, &ctx()).unwrap());
        assert!(!ExecProvider.needs_apply(&skip, &ctx()).unwrap());
        assert_eq!(
            ExecProvider.current_state(&skip, &ctx()).unwrap(),
            ResourceState::Present {
                details: Some("onlyif guard not met".to_string())
            }
        );
    }

    #[test]
    fn test_apply_runs_command_once_guard_satisfied() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("done");
        let marker = marker.display();
        let r = Resource::exec(
            "touch",
            ExecSpec::new(format!("touch {marker}")).unless(format!("test -e {marker}")),
        );

        assert!(ExecProvider.needs_apply(&r, &ctx()).unwrap());
        ExecProvider.apply(&r, &ctx()).unwrap();
        assert!(!ExecProvider.needs_apply(&r, &ctx()).unwrap());
    }

    #[test]
    fn test_failing_command() {
        let r = Resource::exec("fail", ExecSpec::new("echo nope >&2; exit 7"));
        let err = ExecProvider.apply(&r, &ctx()).unwrap_err();
        match err {
            Error::Exec { code, output, .. } => {
                assert_eq!(code, Some(7));
                assert_eq!(output, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let r = Resource::service("varnish", declarative::ServiceEnsure::Running);
        assert!(matches!(
            ExecProvider.apply(&r, &ctx()),
            Err(Error::KindMismatch { .. })
        ));
    }
}
