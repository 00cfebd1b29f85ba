use converge_core::{syntax, Result, Rval};
use tracing::{debug, warn};

use super::PromiseTypeHandler;
use crate::classes::{ClassContext, ClassScope};
use crate::context::EvaluationContext;
use crate::promise::ExpandedPromise;

const COMBINATIONS: [&str; 5] = ["expression", "and", "or", "xor", "not"];

/// Defines the promiser as a soft class when its combination holds.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassesHandler;

impl PromiseTypeHandler for ClassesHandler {
    fn handle(&self, ctx: &mut EvaluationContext, promise: &ExpandedPromise) -> Result<()> {
        if !promise.resolved || syntax::is_expandable(&promise.promiser) {
            debug!("Deferring class promise '{}'", promise.promiser);
            return Ok(());
        }

        let combination = promise
            .constraints
            .iter()
            .rev()
            .find(|c| COMBINATIONS.contains(&c.lval.as_str()));

        let holds = match combination {
            None => true,
            Some(c) => match evaluate(&ctx.classes, &c.lval, &c.rval) {
                Some(value) => value,
                None => {
                    warn!(
                        "Class promise '{}' has an unusable {} value {}",
                        promise.promiser, c.lval, c.rval
                    );
                    return Ok(());
                }
            },
        };

        if holds {
            let scope = match promise.scalar("scope") {
                Some("bundle") => ClassScope::Bundle,
                _ => ClassScope::Namespace,
            };
            ctx.define_class(&promise.promiser, scope);
        } else {
            debug!("Class '{}' not defined: combination false", promise.promiser);
        }
        Ok(())
    }
}

fn evaluate(classes: &ClassContext, lval: &str, rval: &Rval) -> Option<bool> {
    let single = |value: &Rval| -> Option<bool> { classes.evaluate(value.as_scalar()?).ok() };
    let each = |value: &Rval| -> Option<Vec<bool>> {
        match value {
            Rval::List(items) => items.iter().map(|item| single(item)).collect(),
            scalar => Some(vec![single(scalar)?]),
        }
    };

    match lval {
        "expression" => single(rval),
        "not" => single(rval).map(|v| !v),
        "and" => each(rval).map(|vs| vs.iter().all(|v| *v)),
        "or" => each(rval).map(|vs| vs.iter().any(|v| *v)),
        "xor" => each(rval).map(|vs| vs.iter().filter(|v| **v).count() % 2 == 1),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_core::Promise;

    use crate::promise::PromiseId;

    fn run(ctx: &mut EvaluationContext, source: Promise) {
        ctx.enter_promise("main").unwrap();
        let promise =
            ExpandedPromise::expand(ctx, PromiseId::new("main", "classes", 0), &source).unwrap();
        ClassesHandler.handle(ctx, &promise).unwrap();
    }

    fn ctx() -> EvaluationContext {
        let mut ctx = EvaluationContext::default();
        ctx.begin_bundle("main").unwrap();
        ctx.define_class("linux", ClassScope::Namespace);
        ctx
    }

    #[test]
    fn test_expression() {
        let mut ctx = ctx();
        run(&mut ctx, Promise::new("is_linux").with("expression", "linux"));
        run(&mut ctx, Promise::new("is_windows").with("expression", "windows"));
        assert!(ctx.classes.is_defined("is_linux"));
        assert!(!ctx.classes.is_defined("is_windows"));
    }

    #[test]
    fn test_list_combinations() {
        let mut ctx = ctx();
        run(&mut ctx, Promise::new("both").with("and", vec!["linux", "any"]));
        run(&mut ctx, Promise::new("either").with("or", vec!["windows", "linux"]));
        run(&mut ctx, Promise::new("odd").with("xor", vec!["linux", "any"]));
        run(&mut ctx, Promise::new("neither").with("not", "linux"));
        assert!(ctx.classes.is_defined("both"));
        assert!(ctx.classes.is_defined("either"));
        assert!(!ctx.classes.is_defined("odd"));
        assert!(!ctx.classes.is_defined("neither"));
    }

    #[test]
    fn test_function_result_as_expression() {
        let mut ctx = ctx();
        let source = Promise::new("same").with(
            "expression",
            Rval::call("strcmp", vec![Rval::from("a"), Rval::from("a")]),
        );
        run(&mut ctx, source);
        assert!(ctx.classes.is_defined("same"));
    }

    #[test]
    fn test_bundle_scope() {
        let mut ctx = ctx();
        run(&mut ctx, Promise::new("local").with("scope", "bundle"));
        assert!(ctx.classes.is_defined("local"));
        ctx.begin_bundle("next").unwrap();
        assert!(!ctx.classes.is_defined("local"));
    }

    #[test]
    fn test_promiser_is_canonified() {
        let mut ctx = ctx();
        run(&mut ctx, Promise::new("web-01.example"));
        assert!(ctx.classes.is_defined("web_01_example"));
    }
}
