use std::cmp::Ordering;

use converge_core::{syntax, ConvergeError, Result, Rval};
use indexmap::IndexSet;
use rand::Rng;

use super::strings::compile_anchored;
use crate::context::EvaluationContext;
use crate::functions::{arg_int, arg_list, arg_real, arg_str, class_result, ArgType, BuiltinFunction, FunctionRegistry};

use ArgType::{Any, Int, List, Real, String as Str};

pub fn register(registry: &mut FunctionRegistry) {
    registry.register(BuiltinFunction::new("irange", &[Int, Int], irange_fn));
    registry.register(BuiltinFunction::new("rrange", &[Real, Real], rrange_fn));
    registry.register(BuiltinFunction::new("sum", &[List], sum_fn));
    registry.register(BuiltinFunction::new("product", &[List], product_fn));
    registry.register(BuiltinFunction::new("grep", &[Str, List], grep_fn));
    registry.register(BuiltinFunction::new("getindices", &[Str], getindices_fn));
    registry.register(BuiltinFunction::new("getvalues", &[Str], getvalues_fn));
    registry.register(BuiltinFunction::new("isvariable", &[Str], isvariable_fn));
    registry.register(BuiltinFunction::new("isgreaterthan", &[Any, Any], isgreaterthan_fn));
    registry.register(BuiltinFunction::new("islessthan", &[Any, Any], islessthan_fn));
    registry.register(BuiltinFunction::new("randomint", &[Int, Int], randomint_fn));
}

fn irange_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let from = arg_int("irange", args, 0)?;
    let to = arg_int("irange", args, 1)?;
    Ok(Rval::from(format!("{},{}", from.min(to), from.max(to))))
}

fn rrange_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let from = arg_real("rrange", args, 0)?;
    let to = arg_real("rrange", args, 1)?;
    Ok(Rval::from(format!("{:.6},{:.6}", from.min(to), from.max(to))))
}

fn numbers(function: &str, args: &[Rval]) -> Result<Vec<f64>> {
    arg_list(function, args, 0)?
        .iter()
        .filter_map(Rval::as_scalar)
        .filter(|s| *s != converge_core::NULL_VALUE)
        .map(|s| {
            s.trim().parse::<f64>().map_err(|_| ConvergeError::ArgumentError {
                function: function.into(),
                message: format!("'{}' is not a number", s),
            })
        })
        .collect()
}

fn sum_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let total: f64 = numbers("sum", args)?.iter().sum();
    Ok(Rval::from(format!("{:.6}", total)))
}

fn product_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let total: f64 = numbers("product", args)?.iter().product();
    Ok(Rval::from(format!("{:.6}", total)))
}

fn grep_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let re = compile_anchored("grep", arg_str("grep", args, 0)?)?;
    let matches = arg_list("grep", args, 1)?
        .iter()
        .filter(|item| item.as_scalar().is_some_and(|s| re.is_match(s)))
        .cloned()
        .collect();
    Ok(Rval::List(matches))
}

/// Walks the `name[key]` bindings of an array, optionally qualified as
/// `scope.name`, in binding order.
fn array_entries<'a>(ctx: &'a EvaluationContext, array: &str) -> Vec<(String, &'a Rval)> {
    let (scope, name) = match syntax::split_qualified(array) {
        Some((scope, name)) => (scope, name),
        None => (ctx.scopes.current(), array),
    };
    let Some(scope) = ctx.scopes.scope(scope) else {
        return Vec::new();
    };

    let prefix = format!("{}[", name);
    scope
        .iter()
        .filter_map(|binding| {
            let rest = binding.name.strip_prefix(&prefix)?;
            let end = rest.find(']')?;
            Some((rest[..end].to_string(), &binding.value))
        })
        .collect()
}

fn getindices_fn(ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let array = arg_str("getindices", args, 0)?;
    let keys: IndexSet<String> = array_entries(ctx, array).into_iter().map(|(key, _)| key).collect();
    Ok(Rval::List(keys.into_iter().map(Rval::from).collect()))
}

fn getvalues_fn(ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let array = arg_str("getvalues", args, 0)?;
    let values = array_entries(ctx, array).into_iter().map(|(_, value)| value.clone());
    Ok(Rval::list(values))
}

fn isvariable_fn(ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let name = arg_str("isvariable", args, 0)?;
    let found = match syntax::split_qualified(name) {
        Some((scope, var)) => ctx.scopes.lookup(scope, var).is_some(),
        None => ctx.scopes.lookup_current(name).is_some(),
    };
    Ok(class_result(found))
}

fn compare(function: &str, args: &[Rval]) -> Result<Ordering> {
    let left = arg_str(function, args, 0)?;
    let right = arg_str(function, args, 1)?;
    match (left.trim().parse::<f64>(), right.trim().parse::<f64>()) {
        (Ok(a), Ok(b)) => a.partial_cmp(&b).ok_or_else(|| ConvergeError::ArgumentError {
            function: function.into(),
            message: "values are not comparable".into(),
        }),
        _ => Ok(left.cmp(right)),
    }
}

fn isgreaterthan_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    Ok(class_result(compare("isgreaterthan", args)? == Ordering::Greater))
}

fn islessthan_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    Ok(class_result(compare("islessthan", args)? == Ordering::Less))
}

fn randomint_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let low = arg_int("randomint", args, 0)?;
    let high = arg_int("randomint", args, 1)?;
    let (low, high) = (low.min(high), low.max(high));
    if low == high {
        return Ok(Rval::from(low.to_string()));
    }
    let value = rand::thread_rng().gen_range(low..high);
    Ok(Rval::from(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::BindPolicy;

    fn call(func: fn(&EvaluationContext, &[Rval]) -> Result<Rval>, args: Vec<Rval>) -> Result<Rval> {
        func(&EvaluationContext::default(), &args)
    }

    #[test]
    fn test_ranges() {
        assert_eq!(call(irange_fn, vec!["10".into(), "1".into()]).unwrap(), Rval::from("1,10"));
        assert_eq!(
            call(rrange_fn, vec!["0.5".into(), "2".into()]).unwrap(),
            Rval::from("0.500000,2.000000")
        );
    }

    #[test]
    fn test_sum_and_product() {
        let list = Rval::from(vec!["1", "2", "3.5"]);
        assert_eq!(call(sum_fn, vec![list.clone()]).unwrap(), Rval::from("6.500000"));
        assert_eq!(call(product_fn, vec![list]).unwrap(), Rval::from("7.000000"));
        assert!(call(sum_fn, vec![Rval::from(vec!["1", "x"])]).is_err());
    }

    #[test]
    fn test_grep_matches_whole_items() {
        let list = Rval::from(vec!["web01", "db01", "web02x"]);
        let result = call(grep_fn, vec![r"web\d+".into(), list]).unwrap();
        assert_eq!(result, Rval::from(vec!["web01"]));
    }

    #[test]
    fn test_array_functions() {
        let mut ctx = EvaluationContext::default();
        ctx.begin_bundle("main").unwrap();
        ctx.bind("main", "ports[http]", "80", BindPolicy::Mutable).unwrap();
        ctx.bind("main", "ports[https]", "443", BindPolicy::Mutable).unwrap();
        ctx.bind("main", "portsx", "1", BindPolicy::Mutable).unwrap();

        let keys = getindices_fn(&ctx, &[Rval::from("ports")]).unwrap();
        assert_eq!(keys, Rval::from(vec!["http", "https"]));

        let values = getvalues_fn(&ctx, &[Rval::from("main.ports")]).unwrap();
        assert_eq!(values, Rval::from(vec!["80", "443"]));

        let missing = getindices_fn(&ctx, &[Rval::from("nothing")]).unwrap();
        assert_eq!(missing, Rval::List(vec![]));
    }

    #[test]
    fn test_isvariable() {
        let mut ctx = EvaluationContext::default();
        ctx.begin_bundle("main").unwrap();
        ctx.bind("main", "x", "1", BindPolicy::Mutable).unwrap();
        assert_eq!(isvariable_fn(&ctx, &[Rval::from("x")]).unwrap(), Rval::from("any"));
        assert_eq!(isvariable_fn(&ctx, &[Rval::from("main.x")]).unwrap(), Rval::from("any"));
        assert_eq!(isvariable_fn(&ctx, &[Rval::from("y")]).unwrap(), Rval::from("!any"));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(call(isgreaterthan_fn, vec!["10".into(), "9".into()]).unwrap(), Rval::from("any"));
        assert_eq!(call(islessthan_fn, vec!["10".into(), "9".into()]).unwrap(), Rval::from("!any"));
        assert_eq!(call(islessthan_fn, vec!["abc".into(), "abd".into()]).unwrap(), Rval::from("any"));
    }

    #[test]
    fn test_randomint_stays_in_range() {
        for _ in 0..50 {
            let value = call(randomint_fn, vec!["3".into(), "7".into()]).unwrap();
            let n: i64 = value.as_scalar().unwrap().parse().unwrap();
            assert!((3..7).contains(&n));
        }
        assert_eq!(call(randomint_fn, vec!["4".into(), "4".into()]).unwrap(), Rval::from("4"));
    }
}
