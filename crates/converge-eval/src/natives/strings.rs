use std::path::Path;

use converge_core::{syntax, ConvergeError, Result, Rval};
use md5::Md5;
use regex::Regex;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::context::EvaluationContext;
use crate::functions::{arg_int, arg_list, arg_str, class_result, ArgType, BuiltinFunction, FunctionRegistry};

use ArgType::{Int, List, String as Str};

pub fn register(registry: &mut FunctionRegistry) {
    registry.register(BuiltinFunction::new("canonify", &[Str], canonify_fn));
    registry.register(BuiltinFunction::new("concat", &[], concat_fn).varargs());
    registry.register(BuiltinFunction::new("join", &[Str, List], join_fn));
    registry.register(BuiltinFunction::new("splitstring", &[Str, Str, Int], splitstring_fn));
    registry.register(BuiltinFunction::new("strcmp", &[Str, Str], strcmp_fn));
    registry.register(BuiltinFunction::new("regcmp", &[Str, Str], regcmp_fn));
    registry.register(BuiltinFunction::new("regextract", &[Str, Str], regextract_fn));
    registry.register(BuiltinFunction::new("escape", &[Str], escape_fn));
    registry.register(BuiltinFunction::new("lastnode", &[Str, Str], lastnode_fn));
    registry.register(BuiltinFunction::new("dirname", &[Str], dirname_fn));
    registry.register(BuiltinFunction::new("upcase", &[Str], upcase_fn));
    registry.register(BuiltinFunction::new("downcase", &[Str], downcase_fn));
    registry.register(BuiltinFunction::new("hash", &[Str, Str], hash_fn));
}

pub(crate) fn compile(function: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| ConvergeError::ArgumentError {
        function: function.into(),
        message: format!("Invalid regex pattern: {}", e),
    })
}

/// Compiles `pattern` so that it must match the whole subject.
pub(crate) fn compile_anchored(function: &str, pattern: &str) -> Result<Regex> {
    compile(function, &format!("^(?:{})$", pattern))
}

fn canonify_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    Ok(Rval::from(syntax::canonify(arg_str("canonify", args, 0)?)))
}

fn concat_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let mut out = String::new();
    for index in 0..args.len() {
        out.push_str(arg_str("concat", args, index)?);
    }
    Ok(Rval::from(out))
}

fn join_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let separator = arg_str("join", args, 0)?;
    let items: Vec<String> = arg_list("join", args, 1)?
        .iter()
        .filter(|item| item.as_scalar() != Some(converge_core::NULL_VALUE))
        .map(|item| item.to_string())
        .collect();
    Ok(Rval::from(items.join(separator)))
}

fn splitstring_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let text = arg_str("splitstring", args, 0)?;
    let re = compile("splitstring", arg_str("splitstring", args, 1)?)?;
    let max = arg_int("splitstring", args, 2)?.max(0) as usize;
    Ok(Rval::List(
        re.split(text).take(max).map(Rval::from).collect(),
    ))
}

fn strcmp_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    Ok(class_result(arg_str("strcmp", args, 0)? == arg_str("strcmp", args, 1)?))
}

fn regcmp_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let re = compile_anchored("regcmp", arg_str("regcmp", args, 0)?)?;
    Ok(class_result(re.is_match(arg_str("regcmp", args, 1)?)))
}

/// The whole match followed by each capture group; empty when nothing matches.
fn regextract_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let re = compile("regextract", arg_str("regextract", args, 0)?)?;
    let text = arg_str("regextract", args, 1)?;
    let groups = match re.captures(text) {
        Some(captures) => captures
            .iter()
            .map(|m| Rval::from(m.map(|m| m.as_str()).unwrap_or("")))
            .collect(),
        None => Vec::new(),
    };
    Ok(Rval::List(groups))
}

fn escape_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    Ok(Rval::from(regex::escape(arg_str("escape", args, 0)?)))
}

fn lastnode_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let text = arg_str("lastnode", args, 0)?;
    let re = compile("lastnode", arg_str("lastnode", args, 1)?)?;
    Ok(Rval::from(re.split(text).last().unwrap_or("")))
}

fn dirname_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let path = arg_str("dirname", args, 0)?;
    let trimmed = if path.len() > 1 { path.trim_end_matches('/') } else { path };
    let parent = match Path::new(trimmed).parent() {
        Some(p) if p.as_os_str().is_empty() => ".".to_string(),
        Some(p) => p.to_string_lossy().to_string(),
        None => trimmed.to_string(),
    };
    Ok(Rval::from(parent))
}

fn upcase_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    Ok(Rval::from(arg_str("upcase", args, 0)?.to_uppercase()))
}

fn downcase_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    Ok(Rval::from(arg_str("downcase", args, 0)?.to_lowercase()))
}

fn hash_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let data = arg_str("hash", args, 0)?.as_bytes();
    let digest = match arg_str("hash", args, 1)? {
        "md5" => hex::encode(Md5::digest(data)),
        "sha1" => hex::encode(Sha1::digest(data)),
        "sha256" => hex::encode(Sha256::digest(data)),
        "sha512" => hex::encode(Sha512::digest(data)),
        other => {
            return Err(ConvergeError::ArgumentError {
                function: "hash".into(),
                message: format!("unsupported algorithm '{}'", other),
            })
        }
    };
    Ok(Rval::from(digest))
}
