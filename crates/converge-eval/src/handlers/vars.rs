use converge_core::syntax::{self, LIST_SIGIL};
use converge_core::{ConvergeError, DataType, Result, Rval};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error, warn};

use super::PromiseTypeHandler;
use crate::context::{meta_scope, EvaluationContext};
use crate::expand::check_self_reference;
use crate::functions::FnCallStatus;
use crate::promise::ExpandedPromise;
use crate::scope::{BindPolicy, Binding};

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_\x{80}-\x{ff}.]+(\[.+\])*$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarsTarget {
    Bundle,
    Meta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VarPolicy {
    Constant,
    Free,
    IfDefined,
}

impl VarPolicy {
    fn parse(value: Option<&str>) -> Option<Self> {
        match value {
            None | Some("constant") => Some(VarPolicy::Constant),
            Some("free") | Some("overridable") => Some(VarPolicy::Free),
            Some("ifdefined") => Some(VarPolicy::IfDefined),
            Some(_) => None,
        }
    }

    fn bind_policy(self) -> BindPolicy {
        match self {
            VarPolicy::Constant => BindPolicy::Constant,
            VarPolicy::Free | VarPolicy::IfDefined => BindPolicy::Mutable,
        }
    }
}

/// Binds `vars` promises into the bundle scope, `meta` promises into
/// `<bundle>_meta`.
#[derive(Debug, Clone, Copy)]
pub struct VarsHandler {
    target: VarsTarget,
}

impl VarsHandler {
    pub fn new(target: VarsTarget) -> Self {
        Self { target }
    }

    fn scope(&self, bundle: &str) -> String {
        match self.target {
            VarsTarget::Bundle => bundle.to_string(),
            VarsTarget::Meta => meta_scope(bundle),
        }
    }
}

impl PromiseTypeHandler for VarsHandler {
    fn handle(&self, ctx: &mut EvaluationContext, promise: &ExpandedPromise) -> Result<()> {
        let name = promise.promiser.as_str();
        if syntax::is_expandable(name) {
            debug!("Ignoring variable promise with unexpanded name '{}'", name);
            return Ok(());
        }
        if !IDENTIFIER.is_match(name) {
            return Err(ConvergeError::InvalidVariable { name: name.into() });
        }

        let values: Vec<_> = promise
            .constraints
            .iter()
            .filter_map(|c| DataType::from_lval(&c.lval).map(|t| (c, t)))
            .collect();
        let (constraint, data_type) = match values.as_slice() {
            [] => {
                warn!("Variable promise '{}' has no value", name);
                return Ok(());
            }
            [single] => *single,
            _ => {
                error!("Variable promise '{}' has more than one value", name);
                return Ok(());
            }
        };

        let policy = match VarPolicy::parse(promise.scalar("policy")) {
            Some(policy) => policy,
            None => {
                error!(
                    "Variable promise '{}' has unknown policy '{}'",
                    name,
                    promise.scalar("policy").unwrap_or_default()
                );
                return Ok(());
            }
        };

        let scope = self.scope(&promise.id.bundle);
        if let Some(source) = promise.source.constraint(&constraint.lval) {
            check_self_reference(ctx, &promise.id.bundle, name, &source.rval)?;
        }

        if promise.status != FnCallStatus::Success {
            debug!("Not binding '{}': function call did not complete", name);
            return Ok(());
        }

        let mut value = constraint.rval.clone();
        if policy == VarPolicy::IfDefined {
            if let Rval::List(items) = value {
                value = Rval::List(items.into_iter().filter(|v| !is_naked_list(v)).collect());
            }
        }
        if !is_resolved(&value) {
            debug!("Deferring '{}': value {} not yet resolved", name, value);
            return Ok(());
        }

        let value = match coerce(name, data_type, value) {
            Some(value) => value,
            None => return Ok(()),
        };

        ctx.scopes.create_scope(&scope);
        let binding = Binding::new(name, value)
            .typed(data_type)
            .at(promise.location.clone());
        ctx.scopes.bind(&scope, binding, policy.bind_policy())?;
        Ok(())
    }

    fn scope_bound(&self) -> bool {
        true
    }
}

fn is_naked_list(value: &Rval) -> bool {
    value
        .as_scalar()
        .is_some_and(|s| syntax::is_naked_var(s, LIST_SIGIL))
}

fn is_resolved(value: &Rval) -> bool {
    match value {
        Rval::List(items) => items.iter().all(|v| !is_naked_list(v) && !v.is_unresolved()),
        other => !other.is_unresolved(),
    }
}

fn coerce(name: &str, data_type: DataType, value: Rval) -> Option<Rval> {
    let value = match (data_type.is_list(), value) {
        (true, Rval::Scalar(s)) => Rval::List(vec![Rval::Scalar(s)]),
        (true, list @ Rval::List(_)) => list,
        (false, scalar @ Rval::Scalar(_)) => scalar,
        (_, other) => {
            error!(
                "Variable '{}' declared {} but given a {}",
                name,
                data_type,
                other.type_name()
            );
            return None;
        }
    };

    let numeric_ok = |text: &str| match data_type {
        DataType::Int | DataType::Ilist => text.trim().parse::<i64>().is_ok(),
        DataType::Real | DataType::Rlist => text.trim().parse::<f64>().is_ok(),
        _ => true,
    };
    let all_ok = match &value {
        Rval::Scalar(s) => numeric_ok(s),
        Rval::List(items) => items.iter().all(|i| i.as_scalar().is_some_and(numeric_ok)),
        Rval::FnCall(_) => false,
    };
    if !all_ok {
        error!("Variable '{}' value {} is not a valid {}", name, value, data_type);
        return None;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_core::Promise;

    use crate::promise::PromiseId;

    fn run(ctx: &mut EvaluationContext, target: VarsTarget, source: Promise) -> Result<()> {
        ctx.enter_promise("main")?;
        let promise_type = if target == VarsTarget::Meta { "meta" } else { "vars" };
        let promise = ExpandedPromise::expand(ctx, PromiseId::new("main", promise_type, 0), &source)?;
        VarsHandler::new(target).handle(ctx, &promise)
    }

    fn ctx() -> EvaluationContext {
        let mut ctx = EvaluationContext::default();
        ctx.begin_bundle("main").unwrap();
        ctx
    }

    fn lookup(ctx: &EvaluationContext, scope: &str, name: &str) -> Option<Rval> {
        ctx.scopes.lookup(scope, name).map(|b| b.value.clone())
    }

    #[test]
    fn test_binds_string() {
        let mut ctx = ctx();
        run(&mut ctx, VarsTarget::Bundle, Promise::new("x").with("string", "hello")).unwrap();
        assert_eq!(lookup(&ctx, "main", "x"), Some(Rval::from("hello")));
        assert_eq!(ctx.scopes.lookup("main", "x").unwrap().data_type, DataType::String);
    }

    #[test]
    fn test_binds_list_and_array() {
        let mut ctx = ctx();
        run(&mut ctx, VarsTarget::Bundle, Promise::new("l").with("slist", vec!["a", "b"])).unwrap();
        run(&mut ctx, VarsTarget::Bundle, Promise::new("arr[k]").with("string", "v")).unwrap();
        assert_eq!(lookup(&ctx, "main", "l"), Some(Rval::from(vec!["a", "b"])));
        assert_eq!(lookup(&ctx, "main", "arr[k]"), Some(Rval::from("v")));
    }

    #[test]
    fn test_meta_goes_to_meta_scope() {
        let mut ctx = ctx();
        run(&mut ctx, VarsTarget::Meta, Promise::new("tags").with("slist", vec!["t"])).unwrap();
        assert!(lookup(&ctx, "main", "tags").is_none());
        assert_eq!(lookup(&ctx, "main_meta", "tags"), Some(Rval::from(vec!["t"])));
    }

    #[test]
    fn test_unresolved_value_is_deferred() {
        let mut ctx = ctx();
        run(&mut ctx, VarsTarget::Bundle, Promise::new("x").with("string", "$(later)")).unwrap();
        assert!(lookup(&ctx, "main", "x").is_none());
    }

    #[test]
    fn test_constant_is_not_rebound() {
        let mut ctx = ctx();
        run(&mut ctx, VarsTarget::Bundle, Promise::new("x").with("string", "one")).unwrap();
        run(&mut ctx, VarsTarget::Bundle, Promise::new("x").with("string", "two")).unwrap();
        assert_eq!(lookup(&ctx, "main", "x"), Some(Rval::from("one")));

        let free = Promise::new("x").with("string", "three").with("policy", "free");
        run(&mut ctx, VarsTarget::Bundle, free).unwrap();
        assert_eq!(lookup(&ctx, "main", "x"), Some(Rval::from("three")));
    }

    #[test]
    fn test_ifdefined_drops_missing_lists() {
        let mut ctx = ctx();
        ctx.bind("main", "known", vec!["k"], BindPolicy::Constant).unwrap();
        let source = Promise::new("merged")
            .with("slist", vec!["a", "@(known)", "@(unknown)"])
            .with("policy", "ifdefined");
        run(&mut ctx, VarsTarget::Bundle, source).unwrap();
        assert_eq!(lookup(&ctx, "main", "merged"), Some(Rval::from(vec!["a", "k"])));

        let strict = Promise::new("strict").with("slist", vec!["a", "@(unknown)"]);
        run(&mut ctx, VarsTarget::Bundle, strict).unwrap();
        assert!(lookup(&ctx, "main", "strict").is_none());
    }

    #[test]
    fn test_self_reference_is_fatal_and_unbound() {
        let mut ctx = ctx();
        let err = run(&mut ctx, VarsTarget::Bundle, Promise::new("x").with("string", "a $(x)"))
            .unwrap_err();
        assert!(matches!(err, ConvergeError::SelfReference { .. }));
        assert!(err.is_fatal());
        assert!(lookup(&ctx, "main", "x").is_none());
    }

    #[test]
    fn test_self_reference_through_indirection() {
        let mut ctx = ctx();
        ctx.bind("main", "y", "$(x)", BindPolicy::Constant).unwrap();
        let err = run(&mut ctx, VarsTarget::Bundle, Promise::new("x").with("string", "$(y)"))
            .unwrap_err();
        assert!(matches!(err, ConvergeError::SelfReference { .. }));
        assert!(lookup(&ctx, "main", "x").is_none());
    }

    #[test]
    fn test_invalid_identifier() {
        let mut ctx = ctx();
        let err = run(&mut ctx, VarsTarget::Bundle, Promise::new("bad name").with("string", "v"))
            .unwrap_err();
        assert!(matches!(err, ConvergeError::InvalidVariable { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_failed_function_suppresses_binding() {
        let mut ctx = ctx();
        let source = Promise::new("content").with(
            "string",
            Rval::call("readfile", vec![Rval::from("/nonexistent/converge/file"), Rval::from("100")]),
        );
        run(&mut ctx, VarsTarget::Bundle, source).unwrap();
        assert!(lookup(&ctx, "main", "content").is_none());
    }

    #[test]
    fn test_numeric_types_are_checked() {
        let mut ctx = ctx();
        run(&mut ctx, VarsTarget::Bundle, Promise::new("n").with("int", "42")).unwrap();
        run(&mut ctx, VarsTarget::Bundle, Promise::new("bad").with("int", "forty")).unwrap();
        assert_eq!(lookup(&ctx, "main", "n"), Some(Rval::from("42")));
        assert!(lookup(&ctx, "main", "bad").is_none());
    }
}
