use converge_core::{syntax, Result, Rval};

use super::strings::compile_anchored;
use crate::context::EvaluationContext;
use crate::functions::{arg_str, class_result, ArgType, BuiltinFunction, FunctionRegistry};

use ArgType::String as Str;

pub fn register(registry: &mut FunctionRegistry) {
    registry.register(BuiltinFunction::new("classmatch", &[Str], classmatch_fn));
    registry.register(BuiltinFunction::new("countclassesmatching", &[Str], countclassesmatching_fn));
    registry.register(BuiltinFunction::new("classify", &[Str], classify_fn));
    registry.register(BuiltinFunction::new("and", &[], and_fn).varargs());
    registry.register(BuiltinFunction::new("or", &[], or_fn).varargs());
    registry.register(BuiltinFunction::new("not", &[Str], not_fn));
}

fn classmatch_fn(ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let re = compile_anchored("classmatch", arg_str("classmatch", args, 0)?)?;
    Ok(class_result(!ctx.classes.matching(&re).is_empty()))
}

fn countclassesmatching_fn(ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let re = compile_anchored("countclassesmatching", arg_str("countclassesmatching", args, 0)?)?;
    Ok(Rval::from(ctx.classes.matching(&re).len().to_string()))
}

fn classify_fn(ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let name = syntax::canonify(arg_str("classify", args, 0)?);
    Ok(class_result(ctx.classes.is_defined(&name)))
}

fn expressions<'a>(function: &str, args: &'a [Rval]) -> Result<Vec<&'a str>> {
    (0..args.len()).map(|index| arg_str(function, args, index)).collect()
}

fn and_fn(ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    for expression in expressions("and", args)? {
        if !ctx.classes.evaluate(expression)? {
            return Ok(class_result(false));
        }
    }
    Ok(class_result(true))
}

fn or_fn(ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    for expression in expressions("or", args)? {
        if ctx.classes.evaluate(expression)? {
            return Ok(class_result(true));
        }
    }
    Ok(class_result(false))
}

fn not_fn(ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    Ok(class_result(!ctx.classes.evaluate(arg_str("not", args, 0)?)?))
}
