mod scanner;

pub use scanner::{scan, scan_into, References};

use converge_core::syntax::{self, LIST_SIGIL, SCALAR_SIGIL};
use converge_core::{ConvergeError, FnCall, Result, Rval};
use tracing::{error, trace, warn};

use crate::context::EvaluationContext;
use crate::functions::FnCallStatus;

#[derive(Debug, Clone, PartialEq)]
pub struct Expansion {
    pub value: Rval,
    pub resolved: bool,
    pub status: FnCallStatus,
}

impl Expansion {
    fn done(value: Rval, resolved: bool) -> Self {
        Self {
            value,
            resolved,
            status: FnCallStatus::Success,
        }
    }
}

/// Expands every `$(name)` in `text` against the current scope. Lists and
/// unknown names leave their token in place and clear the resolved flag.
pub fn expand_scalar(ctx: &EvaluationContext, text: &str) -> Result<(String, bool)> {
    let limit = ctx.limits().max_expansion_size;
    let mut out = String::with_capacity(text.len());
    let resolved = expand_into(ctx, text, &mut out, limit)?;
    Ok((out, resolved))
}

fn expand_into(ctx: &EvaluationContext, text: &str, out: &mut String, limit: usize) -> Result<bool> {
    let bytes = text.as_bytes();
    let mut resolved = true;
    let mut pos = 0;
    let mut literal = 0;

    while pos < bytes.len() {
        if bytes[pos] == SCALAR_SIGIL {
            if let Some(var) = syntax::reference_at(text, pos, SCALAR_SIGIL) {
                push_bounded(out, &text[literal..pos], limit, text)?;

                let (name, _) = expand_scalar(ctx, var.inner)?;
                match ctx.scopes.lookup_current(&name).map(|b| &b.value) {
                    Some(Rval::Scalar(value)) => push_bounded(out, value, limit, text)?,
                    found => {
                        trace!(
                            "Leaving {} unexpanded ({})",
                            var.token(text),
                            found.map(Rval::type_name).unwrap_or("undefined")
                        );
                        push_bounded(out, var.token(text), limit, text)?;
                        resolved = false;
                    }
                }

                pos = var.end;
                literal = pos;
                continue;
            }
        }
        pos += 1;
    }

    push_bounded(out, &text[literal..], limit, text)?;
    Ok(resolved)
}

fn push_bounded(out: &mut String, piece: &str, limit: usize, source: &str) -> Result<()> {
    if out.len() + piece.len() > limit {
        let text: String = source.chars().take(64).collect();
        error!("Expansion of '{}' exceeds {} bytes", text, limit);
        return Err(ConvergeError::ExpansionOverflow { limit, text });
    }
    out.push_str(piece);
    Ok(())
}

/// Expands a value. A naked `@(list)` scalar becomes the list itself and
/// function calls are evaluated once their arguments resolve.
pub fn expand_rval(ctx: &EvaluationContext, value: &Rval) -> Result<Expansion> {
    match value {
        Rval::Scalar(text) if syntax::is_naked_var(text, LIST_SIGIL) => expand_naked_list(ctx, text),
        Rval::Scalar(text) => {
            let (expanded, resolved) = expand_scalar(ctx, text)?;
            Ok(Expansion::done(Rval::Scalar(expanded), resolved))
        }
        Rval::List(items) => expand_list(ctx, items),
        Rval::FnCall(call) => expand_fncall(ctx, call),
    }
}

pub fn expand_list(ctx: &EvaluationContext, items: &[Rval]) -> Result<Expansion> {
    let mut out = Vec::with_capacity(items.len());
    let mut resolved = true;
    let mut status = FnCallStatus::Success;

    for item in items {
        let expansion = expand_rval(ctx, item)?;
        resolved &= expansion.resolved;
        status = status.merge(expansion.status);
        match expansion.value {
            Rval::List(inner) => out.extend(inner),
            other => out.push(other),
        }
    }

    Ok(Expansion {
        value: Rval::List(out),
        resolved,
        status,
    })
}

fn expand_naked_list(ctx: &EvaluationContext, text: &str) -> Result<Expansion> {
    let inner = syntax::naked_name(text).unwrap_or(text);
    let (name, _) = expand_scalar(ctx, inner)?;
    match ctx.scopes.lookup_current(&name).map(|b| &b.value) {
        Some(Rval::List(items)) => expand_list(ctx, items),
        Some(Rval::Scalar(value)) => Ok(Expansion::done(Rval::Scalar(value.clone()), true)),
        _ => Ok(Expansion::done(Rval::Scalar(text.to_string()), false)),
    }
}

pub fn expand_fncall(ctx: &EvaluationContext, call: &FnCall) -> Result<Expansion> {
    let mut args = Vec::with_capacity(call.args.len());
    let mut args_resolved = true;
    let mut status = FnCallStatus::Success;

    for arg in &call.args {
        let expansion = expand_rval(ctx, arg)?;
        args_resolved &= expansion.resolved;
        status = status.merge(expansion.status);
        args.push(expansion.value);
    }

    let expanded = FnCall::new(call.name.clone(), args);
    match ctx.functions().evaluate(ctx, &expanded, args_resolved) {
        Ok(result) => Ok(Expansion {
            resolved: result.status == FnCallStatus::Success,
            status: status.merge(result.status),
            value: result.value,
        }),
        Err(e) if !e.is_fatal() => {
            warn!("{}", e);
            Ok(Expansion {
                value: Rval::FnCall(expanded),
                resolved: false,
                status: FnCallStatus::Failure,
            })
        }
        Err(e) => Err(e),
    }
}

/// Rejects a variable whose proposed value mentions the variable itself,
/// directly or through bound references up to the configured depth.
pub fn check_self_reference(ctx: &EvaluationContext, scope: &str, name: &str, value: &Rval) -> Result<()> {
    let qualified = format!("{scope}.{name}");
    if refers_to(ctx, &[name, &qualified], value, 0)? {
        error!(
            "Variable \"{}\" contains itself indirectly - an unkeepable promise",
            name
        );
        return Err(ConvergeError::SelfReference {
            variable: name.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}

fn refers_to(ctx: &EvaluationContext, names: &[&str], value: &Rval, level: usize) -> Result<bool> {
    if level > ctx.limits().self_reference_depth {
        return Ok(false);
    }
    match value {
        Rval::Scalar(text) => {
            let direct = names.iter().any(|name| {
                syntax::contains_var(text, name)
                    || text.contains(&syntax::Bracket::Paren.wrap(LIST_SIGIL, name))
                    || text.contains(&syntax::Bracket::Brace.wrap(LIST_SIGIL, name))
            });
            if direct {
                return Ok(true);
            }
            if !syntax::is_expandable(text) {
                return Ok(false);
            }
            let (expanded, _) = expand_scalar(ctx, text)?;
            if expanded == *text {
                return Ok(false);
            }
            refers_to(ctx, names, &Rval::Scalar(expanded), level + 1)
        }
        Rval::List(items) => {
            for item in items {
                if refers_to(ctx, names, item, level)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Rval::FnCall(call) => {
            for arg in &call.args {
                if refers_to(ctx, names, arg, level)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}
