//! Convergence engine - applies a resource graph in dependency order
//!
//! One pass visits every resource exactly once in topological order. After
//! the pass, resources notified by a changed resource get one `restart()`
//! each. The first provider error stops the run; everything learned so far
//! travels back inside [`Error::Aborted`].

use crate::context::{ApplyContext, NoProgress, ProgressCallback};
use crate::error::{Error, Result};
use crate::graph::ResourceGraph;
use crate::provider::Providers;
use crate::report::ConvergenceReport;
use crate::resource::Resource;
use crate::types::{ApplyOptions, ConvergenceResult, Phase, ResourceId};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};

/// What happened to one resource during the main pass
struct Visit {
    trail: Vec<Phase>,
    outcome: Result<ConvergenceResult>,
}

/// Applies graphs through a fixed set of providers
///
/// `apply` takes `&mut self`: one engine converges one graph at a time.
pub struct ConvergenceEngine {
    providers: Providers,
    options: ApplyOptions,
}

impl ConvergenceEngine {
    pub fn new(providers: Providers, options: ApplyOptions) -> Self {
        Self { providers, options }
    }

    /// Converge `graph` without progress reporting
    pub fn apply(&mut self, graph: &ResourceGraph) -> Result<ConvergenceReport> {
        self.apply_with_progress(graph, &mut NoProgress)
    }

    /// Converge `graph`, reporting progress to `progress`
    ///
    /// Graph errors (cycles) are returned before any provider is called.
    pub fn apply_with_progress<P: ProgressCallback>(
        &mut self,
        graph: &ResourceGraph,
        progress: &mut P,
    ) -> Result<ConvergenceReport> {
        let waves = self.plan_waves(graph)?;
        let order: Vec<ResourceId> = waves.iter().flatten().cloned().collect();
        let ctx = ApplyContext::from(&self.options);
        let pool = self.thread_pool();

        log::debug!(
            "applying {} resources in {} waves (dry_run={})",
            order.len(),
            waves.len(),
            ctx.dry_run
        );

        let mut report = ConvergenceReport::new(order);
        progress.on_start(graph.len(), ctx.dry_run);

        for wave in &waves {
            let visits = self.reconcile_wave(graph, wave, &ctx, pool.as_ref(), progress)?;

            let mut failure: Option<(ResourceId, Error)> = None;
            for (id, visit) in visits {
                for phase in &visit.trail {
                    report.advance(&id, *phase);
                }
                let result = match visit.outcome {
                    Ok(result) => result,
                    Err(err) => {
                        let result = ConvergenceResult::Failed {
                            reason: err.to_string(),
                        };
                        if failure.is_none() {
                            failure = Some((id.clone(), err));
                        }
                        result
                    }
                };
                progress.on_resource_complete(&id, &result);
                report.record(&id, result);
            }

            if let Some((id, err)) = failure {
                return Err(abort(report, id, err, progress));
            }
        }

        self.fire_notifications(graph, &ctx, &mut report, progress)?;

        progress.on_finish();
        Ok(report)
    }

    /// Sequential runs use one resource per wave, in topological order
    fn plan_waves(&self, graph: &ResourceGraph) -> Result<Vec<Vec<ResourceId>>> {
        if self.options.jobs > 1 {
            graph.waves()
        } else {
            Ok(graph
                .topological_order()?
                .into_iter()
                .map(|id| vec![id])
                .collect())
        }
    }

    fn thread_pool(&self) -> Option<rayon::ThreadPool> {
        if self.options.jobs <= 1 {
            return None;
        }
        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs)
            .build()
        {
            Ok(pool) => Some(pool),
            Err(e) => {
                log::warn!("could not create apply thread pool, applying sequentially: {e}");
                None
            }
        }
    }

    /// Reconcile one wave; results come back in wave order
    fn reconcile_wave<P: ProgressCallback>(
        &self,
        graph: &ResourceGraph,
        wave: &[ResourceId],
        ctx: &ApplyContext,
        pool: Option<&rayon::ThreadPool>,
        progress: &mut P,
    ) -> Result<Vec<(ResourceId, Visit)>> {
        let resources: Vec<&Resource> = wave
            .iter()
            .map(|id| graph.resource(id))
            .collect::<Result<_>>()?;

        let visits: Vec<Visit> = match pool {
            Some(pool) if resources.len() > 1 => {
                for resource in &resources {
                    progress.on_resource_start(resource.id(), &resource.description());
                }
                pool.install(|| {
                    resources
                        .par_iter()
                        .map(|resource| self.reconcile(resource, ctx))
                        .collect()
                })
            }
            _ => resources
                .iter()
                .map(|resource| {
                    progress.on_resource_start(resource.id(), &resource.description());
                    self.reconcile(resource, ctx)
                })
                .collect(),
        };

        Ok(wave.iter().cloned().zip(visits).collect())
    }

    /// Query, compare and (unless dry run) apply one resource
    fn reconcile(&self, resource: &Resource, ctx: &ApplyContext) -> Visit {
        let id = resource.id();
        let provider = self.providers.for_resource(resource);
        let mut trail = vec![Phase::Querying];

        let needs_apply = match provider.needs_apply(resource, ctx) {
            Ok(needs) => needs,
            Err(err) => {
                log::debug!("{id}: query failed: {err}");
                trail.push(Phase::Failed);
                return Visit {
                    trail,
                    outcome: Err(err),
                };
            }
        };

        if !needs_apply {
            log::debug!("{id}: in sync");
            trail.push(Phase::Unchanged);
            return Visit {
                trail,
                outcome: Ok(ConvergenceResult::Unchanged),
            };
        }

        if ctx.dry_run {
            log::info!("{id}: would change");
            trail.push(Phase::Skipped);
            return Visit {
                trail,
                outcome: Ok(ConvergenceResult::Skipped {
                    reason: "dry run".to_string(),
                }),
            };
        }

        trail.push(Phase::Applying);
        let outcome = match provider.apply(resource, ctx) {
            Ok(()) => {
                log::info!("{id}: changed");
                trail.push(Phase::Applied);
                Ok(ConvergenceResult::Changed)
            }
            Err(err) => {
                trail.push(Phase::Failed);
                Err(err)
            }
        };
        Visit { trail, outcome }
    }

    /// Restart every notify target of a changed resource, once each
    fn fire_notifications<P: ProgressCallback>(
        &self,
        graph: &ResourceGraph,
        ctx: &ApplyContext,
        report: &mut ConvergenceReport,
        progress: &mut P,
    ) -> Result<()> {
        let targets = notify_targets(graph, report, ctx.dry_run);

        if ctx.dry_run {
            report.pending_restarts = targets;
            return Ok(());
        }

        for target in targets {
            let resource = graph.resource(&target)?;
            let provider = self.providers.for_resource(resource);
            report.advance(&target, Phase::Restarting);

            match provider.restart(resource, ctx) {
                Ok(true) => {
                    log::info!("{target}: restarted");
                    report.advance(&target, Phase::Applied);
                    report.restarted.push(target.clone());
                    progress.on_restart(&target);
                }
                Ok(false) => {
                    log::debug!("{target}: restart not needed");
                    report.advance(&target, Phase::Applied);
                }
                Err(err) => {
                    report.advance(&target, Phase::Failed);
                    report.record(
                        &target,
                        ConvergenceResult::Failed {
                            reason: err.to_string(),
                        },
                    );
                    return Err(abort(std::mem::take(report), target, err, progress));
                }
            }
        }

        Ok(())
    }
}

/// Notify targets of triggering resources, deduplicated, in apply order
///
/// A real run triggers on `Changed`; a dry run on `Skipped` (would change).
fn notify_targets(
    graph: &ResourceGraph,
    report: &ConvergenceReport,
    dry_run: bool,
) -> Vec<ResourceId> {
    let position: HashMap<&ResourceId, usize> = report
        .order
        .iter()
        .enumerate()
        .map(|(i, id)| (id, i))
        .collect();

    let mut seen = HashSet::new();
    let mut targets: Vec<ResourceId> = Vec::new();
    for (id, result) in report.results() {
        let triggers = if dry_run {
            matches!(result, ConvergenceResult::Skipped { .. })
        } else {
            result.is_change()
        };
        if !triggers {
            continue;
        }
        for target in graph.notify_targets(id) {
            if seen.insert(target.clone()) {
                log::debug!("{id} notifies {target}");
                targets.push(target.clone());
            }
        }
    }

    targets.sort_by_key(|id| position.get(id).copied().unwrap_or(usize::MAX));
    targets
}

fn abort<P: ProgressCallback>(
    mut report: ConvergenceReport,
    resource: ResourceId,
    err: Error,
    progress: &mut P,
) -> Error {
    log::error!("{resource}: {err}");
    report.fail_unvisited(&resource);
    progress.on_finish();
    Error::Aborted {
        resource,
        source: Box::new(err),
        report: Box::new(report),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::resource::{ExecSpec, FileSpec, PackageEnsure, ServiceEnsure};
    use crate::testing::FakeHost;

    struct Varnishish {
        graph: ResourceGraph,
        pkg: ResourceId,
        conf: ResourceId,
        svc: ResourceId,
        log: ResourceId,
    }

    /// Package → config file → service, plus an unrelated log service
    fn varnishish() -> Varnishish {
        let mut graph = ResourceGraph::new();
        let pkg = graph
            .declare(Resource::package("varnish", PackageEnsure::Present))
            .unwrap();
        let conf = graph
            .declare(Resource::file(
                FileSpec::new("/etc/default/varnish").content("START=yes\n"),
            ))
            .unwrap();
        let svc = graph
            .declare(Resource::service("varnish", ServiceEnsure::Running))
            .unwrap();
        let log = graph
            .declare(Resource::service("varnishlog", ServiceEnsure::Stopped))
            .unwrap();
        graph.require(&conf, &pkg).unwrap();
        graph.require(&svc, &conf).unwrap();
        graph.require(&log, &pkg).unwrap();
        graph.notify(&conf, &svc).unwrap();
        Varnishish {
            graph,
            pkg,
            conf,
            svc,
            log,
        }
    }

    fn engine(host: &FakeHost, options: ApplyOptions) -> ConvergenceEngine {
        ConvergenceEngine::new(host.providers(), options)
    }

    #[test]
    fn test_every_resource_visited_once_in_order() {
        let v = varnishish();
        let host = FakeHost::new();
        let report = engine(&host, ApplyOptions::default())
            .apply(&v.graph)
            .unwrap();

        for id in [&v.pkg, &v.conf, &v.svc, &v.log] {
            assert_eq!(host.count("query", id), 1, "{id} queried once");
            assert_eq!(host.count("apply", id), 1, "{id} applied once");
        }

        let applied: Vec<ResourceId> = host
            .calls()
            .into_iter()
            .filter(|(op, _)| *op == "apply")
            .map(|(_, id)| id)
            .collect();
        let pos = |id: &ResourceId| applied.iter().position(|a| a == id).unwrap();
        assert!(pos(&v.pkg) < pos(&v.conf));
        assert!(pos(&v.conf) < pos(&v.svc));
        assert!(pos(&v.pkg) < pos(&v.log));

        assert!(report.is_success());
        assert_eq!(report.summary().changed, 4);
        assert_eq!(report.order.len(), 4);
    }

    #[test]
    fn test_second_apply_is_all_unchanged() {
        let v = varnishish();
        let host = FakeHost::new();
        let mut engine = engine(&host, ApplyOptions::default());

        engine.apply(&v.graph).unwrap();
        host.clear_calls();
        let second = engine.apply(&v.graph).unwrap();

        assert!(
            second
                .results()
                .all(|(_, r)| *r == ConvergenceResult::Unchanged)
        );
        assert!(second.restarted.is_empty());
        assert!(host.calls().iter().all(|(op, _)| *op == "query"));
    }

    #[test]
    fn test_changed_config_restarts_running_service() {
        let v = varnishish();
        let host = FakeHost::new();
        host.set_in_sync(&v.pkg);
        host.set_in_sync(&v.svc);
        host.set_in_sync(&v.log);

        let report = engine(&host, ApplyOptions::default())
            .apply(&v.graph)
            .unwrap();

        assert_eq!(report.result(&v.conf), Some(&ConvergenceResult::Changed));
        assert_eq!(report.result(&v.svc), Some(&ConvergenceResult::Unchanged));
        assert_eq!(host.count("restart", &v.svc), 1);
        assert_eq!(report.restarted, vec![v.svc.clone()]);
        assert_eq!(report.phase(&v.svc), Some(Phase::Applied));
        assert_eq!(report.summary().restarted, 1);
    }

    #[test]
    fn test_unchanged_config_does_not_notify() {
        let v = varnishish();
        let host = FakeHost::new();
        host.set_in_sync(&v.conf);

        let report = engine(&host, ApplyOptions::default())
            .apply(&v.graph)
            .unwrap();

        assert_eq!(host.count("restart", &v.svc), 0);
        assert!(report.restarted.is_empty());
        assert_eq!(report.phase(&v.svc), Some(Phase::Applied));
    }

    #[test]
    fn test_failure_aborts_and_marks_unvisited() {
        let v = varnishish();
        let host = FakeHost::new();
        host.fail_apply(&v.conf);

        let err = engine(&host, ApplyOptions::default())
            .apply(&v.graph)
            .unwrap_err();

        let Error::Aborted {
            resource,
            source,
            report,
        } = err
        else {
            panic!("expected aborted run");
        };
        assert_eq!(resource, v.conf);
        assert!(matches!(*source, Error::Exec { .. }));

        assert_eq!(report.result(&v.pkg), Some(&ConvergenceResult::Changed));
        assert!(matches!(
            report.result(&v.conf),
            Some(ConvergenceResult::Failed { reason }) if reason.contains("boom")
        ));
        assert!(matches!(
            report.result(&v.svc),
            Some(ConvergenceResult::Failed { reason }) if reason.contains("File[/etc/default/varnish]")
        ));
        assert_eq!(report.phase(&v.svc), Some(Phase::Failed));
        assert_eq!(host.count("query", &v.svc), 0);
        assert_eq!(host.count("restart", &v.svc), 0);
        assert!(!report.is_success());
    }

    #[test]
    fn test_timeout_aborts_and_marks_dependents() {
        let v = varnishish();
        let host = FakeHost::new();
        host.fail_timeout(&v.pkg);

        let err = engine(&host, ApplyOptions::default())
            .apply(&v.graph)
            .unwrap_err();

        assert_eq!(err.category(), ErrorCategory::Timeout);
        let Error::Aborted {
            resource,
            source,
            report,
        } = err
        else {
            panic!("expected aborted run");
        };
        assert_eq!(resource, v.pkg);
        assert!(matches!(*source, Error::Timeout { .. }));

        for dependent in [&v.conf, &v.svc] {
            assert!(matches!(
                report.result(dependent),
                Some(ConvergenceResult::Failed { reason }) if reason.contains("Package[varnish]")
            ));
            assert_eq!(host.count("apply", dependent), 0);
        }
        assert_eq!(report.summary().failed, report.order.len());
        assert!(report.restarted.is_empty());
    }

    #[test]
    fn test_cycle_rejected_before_any_provider_call() {
        let mut graph = ResourceGraph::new();
        let a = graph
            .declare(Resource::exec("a", ExecSpec::new("true")))
            .unwrap();
        let b = graph
            .declare(Resource::exec("b", ExecSpec::new("true")))
            .unwrap();
        graph.require(&a, &b).unwrap();
        graph.require(&b, &a).unwrap();

        let host = FakeHost::new();
        let err = engine(&host, ApplyOptions::default())
            .apply(&graph)
            .unwrap_err();
        assert!(matches!(err, Error::CyclicDependency { .. }));
        assert!(host.calls().is_empty());
    }

    #[test]
    fn test_notify_cycle_restarts_each_target_once() {
        let mut graph = ResourceGraph::new();
        let a = graph
            .declare(Resource::exec("a", ExecSpec::new("true")))
            .unwrap();
        let b = graph
            .declare(Resource::exec("b", ExecSpec::new("true")))
            .unwrap();
        graph.notify(&a, &b).unwrap();
        graph.notify(&b, &a).unwrap();

        let host = FakeHost::new();
        let report = engine(&host, ApplyOptions::default())
            .apply(&graph)
            .unwrap();

        assert_eq!(host.count("restart", &a), 1);
        assert_eq!(host.count("restart", &b), 1);
        assert_eq!(report.restarted, vec![a, b]);
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let v = varnishish();
        let host = FakeHost::new();
        host.set_in_sync(&v.pkg);

        let options = ApplyOptions {
            dry_run: true,
            ..ApplyOptions::default()
        };
        let report = engine(&host, options).apply(&v.graph).unwrap();

        assert!(host.calls().iter().all(|(op, _)| *op == "query"));
        assert_eq!(report.result(&v.pkg), Some(&ConvergenceResult::Unchanged));
        assert!(matches!(
            report.result(&v.conf),
            Some(ConvergenceResult::Skipped { .. })
        ));
        assert_eq!(report.pending_restarts, vec![v.svc.clone()]);
        assert!(report.restarted.is_empty());
        assert!(report.is_success());
    }

    #[test]
    fn test_parallel_apply_matches_sequential() {
        let v = varnishish();

        let sequential_host = FakeHost::new();
        let sequential = engine(&sequential_host, ApplyOptions::default())
            .apply(&v.graph)
            .unwrap();

        let parallel_host = FakeHost::new();
        let options = ApplyOptions {
            jobs: 4,
            ..ApplyOptions::default()
        };
        let parallel = engine(&parallel_host, options).apply(&v.graph).unwrap();

        let seq: Vec<_> = sequential.results().collect();
        let par: Vec<_> = parallel.results().collect();
        assert_eq!(seq.len(), par.len());
        for (id, result) in par {
            assert_eq!(sequential.result(id), Some(result));
        }
        assert_eq!(parallel.restarted, sequential.restarted);
    }

    #[test]
    fn test_parallel_failure_stops_before_next_wave() {
        let v = varnishish();
        let host = FakeHost::new();
        host.fail_apply(&v.pkg);

        let options = ApplyOptions {
            jobs: 4,
            ..ApplyOptions::default()
        };
        let err = engine(&host, options).apply(&v.graph).unwrap_err();
        let report = err.report().unwrap();

        assert_eq!(host.count("query", &v.conf), 0);
        assert_eq!(host.count("query", &v.log), 0);
        assert_eq!(report.summary().failed, 4);
    }

    #[test]
    fn test_restart_failure_aborts() {
        let v = varnishish();
        let host = FakeHost::new();
        host.fail_restart(&v.svc);

        let err = engine(&host, ApplyOptions::default())
            .apply(&v.graph)
            .unwrap_err();

        assert!(matches!(&err, Error::Aborted { resource, .. } if *resource == v.svc));
        let report = err.report().unwrap();
        assert!(matches!(
            report.result(&v.svc),
            Some(ConvergenceResult::Failed { .. })
        ));
        assert_eq!(report.result(&v.conf), Some(&ConvergenceResult::Changed));
    }
}
