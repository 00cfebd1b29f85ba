use std::sync::Arc;

use converge_core::{
    AgentSettings, Bundle, BundleInvocation, ConvergeError, Policy, Promise, Result, Rval,
};
use tracing::{debug, error, info, warn};

use crate::background::BackgroundPool;
use crate::context::EvaluationContext;
use crate::expand::{expand_rval, scan_into, References};
use crate::functions::FnCallStatus;
use crate::handlers::{HandlerRegistry, PromiseTypeHandler};
use crate::iteration::IterationState;
use crate::promise::{guard_holds, ExpandedPromise, PromiseId};
use crate::scope::{BindPolicy, Binding};

/// Promise types in evaluation order. Variables come before everything
/// that may reference them.
pub const AGENT_TYPE_SEQUENCE: &[&str] = &[
    "meta",
    "vars",
    "defaults",
    "classes",
    "outputs",
    "interfaces",
    "files",
    "packages",
    "environments",
    "methods",
    "processes",
    "services",
    "commands",
    "storage",
    "databases",
    "reports",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub bundles: usize,
    pub passes: usize,
    pub dispatched: usize,
    pub backgrounded: usize,
    pub kept: usize,
    pub not_kept: usize,
}

pub struct Scheduler {
    policy: Arc<Policy>,
    handlers: HandlerRegistry,
    settings: AgentSettings,
    type_sequence: Vec<String>,
}

impl Scheduler {
    pub fn new(policy: Policy, handlers: HandlerRegistry, settings: AgentSettings) -> Self {
        Self {
            policy: Arc::new(policy),
            handlers,
            settings,
            type_sequence: AGENT_TYPE_SEQUENCE.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn with_type_sequence(mut self, sequence: &[&str]) -> Self {
        self.type_sequence = sequence.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Resolves the bundle sequence: configured names win over the policy's
    /// control body, which wins over every runnable bundle in document order.
    pub fn bundle_sequence(&self) -> Result<Vec<(BundleInvocation, &Bundle)>> {
        let invocations = match &self.settings.bundlesequence {
            Some(names) => names
                .iter()
                .map(|n| BundleInvocation::parse(n))
                .collect::<Result<Vec<_>>>()?,
            None if !self.policy.control.bundlesequence.is_empty() => {
                self.policy.bundle_sequence()?
            }
            None => self
                .policy
                .bundles
                .iter()
                .filter(|b| b.is_runnable())
                .map(|b| BundleInvocation::named(b.name.clone()))
                .collect(),
        };

        let mut resolved = Vec::with_capacity(invocations.len());
        for invocation in invocations {
            match self.policy.bundle(&invocation.name) {
                Some(bundle) => {
                    if bundle.parameters.len() != invocation.args.len() {
                        return Err(ConvergeError::BundleArguments {
                            name: bundle.name.clone(),
                            expected: bundle.parameters.len(),
                            given: invocation.args.len(),
                        });
                    }
                    resolved.push((invocation, bundle));
                }
                None if self.settings.ignore_missing_bundles => {
                    warn!("Bundle \"{}\" listed in the bundlesequence is not defined, ignoring", invocation.name);
                }
                None => {
                    error!("Bundle \"{}\" listed in the bundlesequence is not defined", invocation.name);
                    return Err(ConvergeError::MissingBundle {
                        name: invocation.name,
                    });
                }
            }
        }
        Ok(resolved)
    }

    pub async fn run(&self, ctx: &mut EvaluationContext) -> Result<RunReport> {
        let sequence = self.bundle_sequence()?;
        let mut report = RunReport::default();
        let mut pool = BackgroundPool::new(self.settings.max_children);

        let mut outcome = Ok(());
        for (invocation, bundle) in sequence {
            if let Err(e) = self.run_bundle(ctx, bundle, &invocation, &mut pool, &mut report) {
                outcome = Err(e);
                break;
            }
        }

        let failures = pool.join_all().await;
        if failures > 0 {
            warn!("{} background promise(s) failed", failures);
        }
        report.backgrounded = pool.spawned();
        outcome.map(|_| report)
    }

    fn run_bundle(
        &self,
        ctx: &mut EvaluationContext,
        bundle: &Bundle,
        invocation: &BundleInvocation,
        pool: &mut BackgroundPool,
        report: &mut RunReport,
    ) -> Result<()> {
        let mut arguments = Vec::with_capacity(invocation.args.len());
        for arg in &invocation.args {
            arguments.push(expand_rval(ctx, arg)?.value);
        }
        report.bundles += 1;

        if self.converged(ctx, bundle, &arguments) {
            info!("Bundle {} already converged", bundle.name);
            report.kept += self.tally(ctx, bundle, &arguments).0;
            return Ok(());
        }

        info!("Evaluating bundle {}", bundle.name);
        self.bind_parameters(ctx, bundle, &arguments)?;
        self.reopen_scope_bound(ctx, bundle, &arguments);

        for pass in 1..=self.settings.max_passes {
            debug!("Bundle {} pass {}", bundle.name, pass);
            report.passes += 1;

            for promise_type in &self.type_sequence {
                let promises = match bundle.promises(promise_type) {
                    Some(promises) if !promises.is_empty() => promises,
                    _ => continue,
                };
                let handler = match self.handlers.get(promise_type) {
                    Some(handler) => handler,
                    None => {
                        debug!("No handler for {} promises, skipping", promise_type);
                        continue;
                    }
                };

                if !handler.init(ctx)? {
                    debug!("{} context declined pass {}", promise_type, pass);
                    continue;
                }
                for (index, promise) in promises.iter().enumerate() {
                    let id = PromiseId::new(&bundle.name, promise_type, index)
                        .with_arguments(arguments.clone());
                    self.keep_promise(ctx, &handler, id, promise, pool, report)
                        .map_err(|e| {
                            error!(
                                "Aborting bundle {}: {} promise '{}': {}",
                                bundle.name, promise_type, promise.promiser, e
                            );
                            e.in_promise(&bundle.name, promise_type, &promise.promiser)
                        })?;
                }
                handler.teardown(ctx)?;
            }

            if self.converged(ctx, bundle, &arguments) {
                debug!("Bundle {} converged after {} pass(es)", bundle.name, pass);
                break;
            }
        }

        let (kept, not_kept) = self.tally(ctx, bundle, &arguments);
        report.kept += kept;
        report.not_kept += not_kept;
        if not_kept > 0 {
            info!(
                "Bundle {}: {} promise(s) not resolved after {} pass(es)",
                bundle.name, not_kept, self.settings.max_passes
            );
        }

        for parameter in &bundle.parameters {
            ctx.scopes.unbind(&bundle.name, parameter);
        }
        Ok(())
    }

    fn bind_parameters(&self, ctx: &mut EvaluationContext, bundle: &Bundle, values: &[Rval]) -> Result<()> {
        ctx.begin_bundle(&bundle.name)?;
        for (name, value) in bundle.parameters.iter().zip(values) {
            let binding = Binding::new(name.as_str(), value.clone());
            ctx.scopes.bind(&bundle.name, binding, BindPolicy::Constant)?;
        }
        Ok(())
    }

    /// The bundle scope was just reset, so promises that bound into it on an
    /// earlier invocation have to run again.
    fn reopen_scope_bound(&self, ctx: &mut EvaluationContext, bundle: &Bundle, arguments: &[Rval]) {
        for promise_type in &self.type_sequence {
            let scope_bound = self
                .handlers
                .get(promise_type)
                .is_some_and(|handler| handler.scope_bound());
            if !scope_bound {
                continue;
            }
            let count = bundle.promises(promise_type).map(<[Promise]>::len).unwrap_or(0);
            for index in 0..count {
                let id = PromiseId::new(&bundle.name, promise_type, index)
                    .with_arguments(arguments.to_vec());
                if ctx.clear_done(&id) {
                    debug!("Re-opening {} for a fresh bundle scope", id);
                }
            }
        }
    }

    fn keep_promise(
        &self,
        ctx: &mut EvaluationContext,
        handler: &Arc<dyn PromiseTypeHandler>,
        id: PromiseId,
        promise: &Promise,
        pool: &mut BackgroundPool,
        report: &mut RunReport,
    ) -> Result<()> {
        if ctx.is_done(&id) {
            debug!("Skipping '{}': already done", promise.promiser);
            return Ok(());
        }
        if !guard_holds(&ctx.classes, &promise.classes) {
            debug!("Skipping '{}': class guard '{}' not defined", promise.promiser, promise.classes);
            return Ok(());
        }

        ctx.enter_promise(&id.bundle)?;
        let mut refs = References::default();
        scan_into(ctx, &Rval::scalar(promise.promiser.as_str()), &mut refs)?;
        if let Some(promisee) = &promise.promisee {
            scan_into(ctx, promisee, &mut refs)?;
        }
        for constraint in &promise.constraints {
            scan_into(ctx, &constraint.rval, &mut refs)?;
        }

        let mut state = IterationState::begin(ctx, &refs.lists)?;
        if state.is_finished() {
            debug!("'{}' iterates over an empty list, nothing to do this pass", promise.promiser);
            return Ok(());
        }

        let mut kept = true;
        loop {
            state.bind_current(ctx)?;
            let expanded = ExpandedPromise::expand(ctx, id.clone(), promise)?;

            if expanded.excluded(&ctx.classes) {
                kept = false;
            } else {
                if !expanded.resolved {
                    debug!("'{}' not fully resolved, deferring", expanded.promiser);
                    kept = false;
                }
                if !self.dispatch(ctx, handler, expanded, pool, report)? {
                    kept = false;
                }
            }

            if !state.advance() {
                break;
            }
        }

        if kept && !handler.repeatable() {
            ctx.mark_done(id);
        }
        Ok(())
    }

    /// Runs the handler on one instance. Returns false when the instance was
    /// not kept this round.
    fn dispatch(
        &self,
        ctx: &mut EvaluationContext,
        handler: &Arc<dyn PromiseTypeHandler>,
        promise: ExpandedPromise,
        pool: &mut BackgroundPool,
        report: &mut RunReport,
    ) -> Result<bool> {
        report.dispatched += 1;
        let status_ok = promise.status == FnCallStatus::Success;

        let promise = if promise.is_true("background") && handler.supports_background() {
            match pool.try_spawn(handler.clone(), ctx.clone(), promise) {
                Ok(()) => return Ok(status_ok),
                Err((_, promise)) => promise,
            }
        } else {
            promise
        };

        match handler.handle(ctx, &promise) {
            Ok(()) => Ok(status_ok),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                error!("{} promise '{}': {}", promise.id.promise_type, promise.promiser, e);
                Ok(false)
            }
        }
    }

    fn handled_promises<'a>(
        &'a self,
        bundle: &'a Bundle,
        arguments: &'a [Rval],
    ) -> impl Iterator<Item = PromiseId> + 'a {
        self.type_sequence
            .iter()
            .filter(|t| self.handlers.contains(t))
            .flat_map(move |t| {
                let count = bundle.promises(t).map(<[Promise]>::len).unwrap_or(0);
                (0..count).map(move |index| {
                    PromiseId::new(&bundle.name, t, index).with_arguments(arguments.to_vec())
                })
            })
    }

    fn converged(&self, ctx: &EvaluationContext, bundle: &Bundle, arguments: &[Rval]) -> bool {
        self.handled_promises(bundle, arguments)
            .all(|id| ctx.is_done(&id))
    }

    fn tally(&self, ctx: &EvaluationContext, bundle: &Bundle, arguments: &[Rval]) -> (usize, usize) {
        self.handled_promises(bundle, arguments)
            .fold((0, 0), |(kept, not_kept), id| {
                if ctx.is_done(&id) {
                    (kept + 1, not_kept)
                } else {
                    (kept, not_kept + 1)
                }
            })
    }
}
