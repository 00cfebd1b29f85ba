use std::fmt;

use converge_core::{syntax, Constraint, Promise, Result, Rval, SourceLocation};
use tracing::{debug, warn};

use crate::classes::ClassContext;
use crate::context::EvaluationContext;
use crate::expand::{expand_rval, expand_scalar};
use crate::functions::FnCallStatus;
use crate::scope::{BindPolicy, Binding, THIS_SCOPE};

/// Identifies a promise in one bundle invocation; the done flag is keyed on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PromiseId {
    pub bundle: String,
    pub arguments: Vec<Rval>,
    pub promise_type: String,
    pub index: usize,
}

impl PromiseId {
    pub fn new(bundle: impl Into<String>, promise_type: impl Into<String>, index: usize) -> Self {
        Self {
            bundle: bundle.into(),
            arguments: Vec::new(),
            promise_type: promise_type.into(),
            index,
        }
    }

    pub fn with_arguments(mut self, arguments: Vec<Rval>) -> Self {
        self.arguments = arguments;
        self
    }

    fn default_handle(&self) -> String {
        syntax::canonify(&format!(
            "promise_{}_{}_{}",
            self.bundle, self.promise_type, self.index
        ))
    }
}

impl fmt::Display for PromiseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.bundle, self.promise_type, self.index)
    }
}

/// One concrete instance of a promise for a single iteration combination.
#[derive(Debug, Clone)]
pub struct ExpandedPromise {
    pub id: PromiseId,
    pub promiser: String,
    pub promisee: Option<Rval>,
    pub handle: String,
    pub constraints: Vec<Constraint>,
    pub location: Option<SourceLocation>,
    pub source: Promise,
    pub resolved: bool,
    pub status: FnCallStatus,
}

impl ExpandedPromise {
    /// Expands `source` against the current `this` scope. `this.promiser` and
    /// `this.handle` are bound before the constraints are expanded.
    pub fn expand(ctx: &mut EvaluationContext, id: PromiseId, source: &Promise) -> Result<Self> {
        let (promiser, mut resolved) = expand_scalar(ctx, &source.promiser)?;
        let mut status = FnCallStatus::Success;

        let handle = match source.constraint("handle").map(|c| &c.rval) {
            Some(Rval::Scalar(text)) => expand_scalar(ctx, text)?.0,
            _ => id.default_handle(),
        };
        ctx.scopes.bind(
            THIS_SCOPE,
            Binding::new("promiser", promiser.as_str()),
            BindPolicy::Mutable,
        )?;
        ctx.scopes.bind(
            THIS_SCOPE,
            Binding::new("handle", handle.as_str()),
            BindPolicy::Mutable,
        )?;

        let promisee = match &source.promisee {
            Some(value) => {
                let expansion = expand_rval(ctx, value)?;
                resolved &= expansion.resolved;
                status = status.merge(expansion.status);
                Some(expansion.value)
            }
            None => None,
        };

        let mut constraints = Vec::with_capacity(source.constraints.len());
        for constraint in &source.constraints {
            if !guard_holds(&ctx.classes, &constraint.classes) {
                debug!(
                    "Dropping constraint {} of '{}': class guard '{}' not defined",
                    constraint.lval, promiser, constraint.classes
                );
                continue;
            }
            let expansion = expand_rval(ctx, &constraint.rval)?;
            resolved &= expansion.resolved;
            status = status.merge(expansion.status);
            constraints.push(Constraint {
                lval: constraint.lval.clone(),
                rval: expansion.value,
                data_type: constraint.data_type,
                classes: constraint.classes.clone(),
            });
        }

        Ok(Self {
            id,
            promiser,
            promisee,
            handle,
            constraints,
            location: source.location.clone(),
            source: source.clone(),
            resolved,
            status,
        })
    }

    /// The last applicable constraint with this lval.
    pub fn constraint(&self, lval: &str) -> Option<&Constraint> {
        self.constraints.iter().rev().find(|c| c.lval == lval)
    }

    pub fn value(&self, lval: &str) -> Option<&Rval> {
        self.constraint(lval).map(|c| &c.rval)
    }

    pub fn scalar(&self, lval: &str) -> Option<&str> {
        self.value(lval).and_then(Rval::as_scalar)
    }

    pub fn is_true(&self, lval: &str) -> bool {
        matches!(self.scalar(lval), Some("true" | "yes" | "on"))
    }

    /// True when `ifvarclass`/`if` fails or `unless` holds. Guards that are
    /// still unresolved exclude the instance.
    pub fn excluded(&self, classes: &ClassContext) -> bool {
        for lval in ["ifvarclass", "if"] {
            if let Some(value) = self.value(lval) {
                if !value_guard(classes, value).unwrap_or(false) {
                    debug!("Skipping '{}': {} guard not satisfied", self.promiser, lval);
                    return true;
                }
            }
        }
        if let Some(value) = self.value("unless") {
            if value_guard(classes, value).unwrap_or(true) {
                debug!("Skipping '{}': unless guard holds", self.promiser);
                return true;
            }
        }
        false
    }
}

fn value_guard(classes: &ClassContext, value: &Rval) -> Option<bool> {
    match value {
        Rval::Scalar(expr) if !syntax::is_expandable(expr) => classes.evaluate(expr).ok(),
        _ => None,
    }
}

pub(crate) fn guard_holds(classes: &ClassContext, expression: &str) -> bool {
    match classes.evaluate(expression) {
        Ok(value) => value,
        Err(e) => {
            warn!("{}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::ClassScope;

    fn ctx() -> EvaluationContext {
        let mut ctx = EvaluationContext::default();
        ctx.bind("main", "dir", "/etc", BindPolicy::Constant).unwrap();
        ctx.enter_promise("main").unwrap();
        ctx
    }

    #[test]
    fn test_expands_promiser_and_constraints() {
        let mut ctx = ctx();
        let source = Promise::new("$(dir)/motd")
            .with("comment", "file $(this.promiser)")
            .with_promisee("$(dir)");
        let promise = ExpandedPromise::expand(&mut ctx, PromiseId::new("main", "files", 0), &source).unwrap();

        assert_eq!(promise.promiser, "/etc/motd");
        assert_eq!(promise.promisee, Some(Rval::from("/etc")));
        assert_eq!(promise.scalar("comment"), Some("file /etc/motd"));
        assert!(promise.resolved);
        assert_eq!(promise.handle, "promise_main_files_0");
    }

    #[test]
    fn test_handle_constraint() {
        let mut ctx = ctx();
        let source = Promise::new("x")
            .with("handle", "my_handle")
            .with("comment", "$(this.handle)");
        let promise = ExpandedPromise::expand(&mut ctx, PromiseId::new("main", "vars", 0), &source).unwrap();
        assert_eq!(promise.handle, "my_handle");
        assert_eq!(promise.scalar("comment"), Some("my_handle"));
    }

    #[test]
    fn test_unresolved_constraint_marks_instance() {
        let mut ctx = ctx();
        let source = Promise::new("x").with("string", "$(later)");
        let promise = ExpandedPromise::expand(&mut ctx, PromiseId::new("main", "vars", 0), &source).unwrap();
        assert!(!promise.resolved);
        assert_eq!(promise.scalar("string"), Some("$(later)"));
    }

    #[test]
    fn test_last_applicable_constraint_wins() {
        let mut ctx = ctx();
        ctx.define_class("special", ClassScope::Namespace);
        let source = Promise::new("x")
            .with("string", "default")
            .with_constraint(Constraint::new("string", "special").guarded("special"))
            .with_constraint(Constraint::new("string", "never").guarded("missing_class"));
        let promise = ExpandedPromise::expand(&mut ctx, PromiseId::new("main", "vars", 0), &source).unwrap();
        assert_eq!(promise.scalar("string"), Some("special"));
        assert_eq!(promise.constraints.len(), 2);
    }

    #[test]
    fn test_variable_context_exclusion() {
        let mut ctx = ctx();
        ctx.define_class("linux", ClassScope::Namespace);
        let id = PromiseId::new("main", "reports", 0);

        let kept = Promise::new("a").with("ifvarclass", "linux");
        let p = ExpandedPromise::expand(&mut ctx, id.clone(), &kept).unwrap();
        assert!(!p.excluded(&ctx.classes));

        let skipped = Promise::new("b").with("if", "windows");
        let p = ExpandedPromise::expand(&mut ctx, id.clone(), &skipped).unwrap();
        assert!(p.excluded(&ctx.classes));

        let unless = Promise::new("c").with("unless", "linux");
        let p = ExpandedPromise::expand(&mut ctx, id.clone(), &unless).unwrap();
        assert!(p.excluded(&ctx.classes));

        let unresolved = Promise::new("d").with("ifvarclass", "$(nope)");
        let p = ExpandedPromise::expand(&mut ctx, id, &unresolved).unwrap();
        assert!(p.excluded(&ctx.classes));
    }

    #[test]
    fn test_is_true() {
        let mut ctx = ctx();
        let source = Promise::new("x").with("background", "yes");
        let promise = ExpandedPromise::expand(&mut ctx, PromiseId::new("main", "reports", 0), &source).unwrap();
        assert!(promise.is_true("background"));
        assert!(!promise.is_true("missing"));
    }
}
