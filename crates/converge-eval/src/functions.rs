use std::collections::HashMap;

use converge_core::{ConvergeError, FnCall, Result, Rval};
use tracing::{debug, trace, warn};

use crate::context::EvaluationContext;

pub type FunctionImpl = fn(&EvaluationContext, &[Rval]) -> Result<Rval>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    String,
    Int,
    Real,
    List,
    Any,
}

/// Outcome of one evaluation attempt. `Failure` wins over `Deferred`, which
/// wins over `Success`, when statuses are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum FnCallStatus {
    #[default]
    Success,
    Deferred,
    Failure,
}

impl FnCallStatus {
    pub fn merge(self, other: FnCallStatus) -> FnCallStatus {
        self.max(other)
    }
}

#[derive(Debug, Clone)]
pub struct FnResult {
    pub value: Rval,
    pub status: FnCallStatus,
}

#[derive(Clone)]
pub struct BuiltinFunction {
    pub name: &'static str,
    pub params: Vec<ArgType>,
    pub varargs: bool,
    pub func: FunctionImpl,
}

impl std::fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinFunction")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("varargs", &self.varargs)
            .finish()
    }
}

impl BuiltinFunction {
    pub fn new(name: &'static str, params: &[ArgType], func: FunctionImpl) -> Self {
        Self {
            name,
            params: params.to_vec(),
            varargs: false,
            func,
        }
    }

    /// Accepts any number of further arguments after the declared ones.
    pub fn varargs(mut self) -> Self {
        self.varargs = true;
        self
    }

    fn check_args(&self, args: &[Rval]) -> Result<()> {
        let expected = self.params.len();
        let count_ok = if self.varargs {
            args.len() >= expected
        } else {
            args.len() == expected
        };
        if !count_ok {
            return Err(ConvergeError::ArgumentError {
                function: self.name.into(),
                message: format!(
                    "takes {}{} argument(s) ({} given)",
                    if self.varargs { "at least " } else { "exactly " },
                    expected,
                    args.len()
                ),
            });
        }

        for (index, (param, arg)) in self.params.iter().zip(args).enumerate() {
            let ok = match param {
                ArgType::Any => true,
                ArgType::List => arg.is_list(),
                ArgType::String => arg.as_scalar().is_some(),
                ArgType::Int => arg.as_scalar().is_some_and(|s| s.trim().parse::<i64>().is_ok()),
                ArgType::Real => arg.as_scalar().is_some_and(|s| s.trim().parse::<f64>().is_ok()),
            };
            if !ok {
                return Err(ConvergeError::ArgumentError {
                    function: self.name.into(),
                    message: format!("argument {} should be {:?}, got '{}'", index + 1, param, arg),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<&'static str, BuiltinFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::natives::register_all(&mut registry);
        registry
    }

    pub fn register(&mut self, function: BuiltinFunction) {
        self.functions.insert(function.name, function);
    }

    pub fn get(&self, name: &str) -> Option<&BuiltinFunction> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Evaluates a call whose arguments have already been expanded.
    ///
    /// Unresolved arguments defer the call and hand it back untouched. An
    /// implementation error leaves the call unevaluated with `Failure`. Only an
    /// unknown name is reported as `Err`.
    pub fn evaluate(&self, ctx: &EvaluationContext, call: &FnCall, args_resolved: bool) -> Result<FnResult> {
        let function = self
            .functions
            .get(call.name.as_str())
            .ok_or_else(|| ConvergeError::UnknownFunction {
                name: call.name.clone(),
            })?;

        if !args_resolved {
            debug!("Deferring {}: arguments not yet resolved", call);
            return Ok(FnResult {
                value: Rval::FnCall(call.clone()),
                status: FnCallStatus::Deferred,
            });
        }

        let outcome = function
            .check_args(&call.args)
            .and_then(|_| (function.func)(ctx, &call.args));

        match outcome {
            Ok(value) => {
                trace!("{} => {}", call, value);
                Ok(FnResult {
                    value,
                    status: FnCallStatus::Success,
                })
            }
            Err(e) => {
                warn!("{}", e);
                Ok(FnResult {
                    value: Rval::FnCall(call.clone()),
                    status: FnCallStatus::Failure,
                })
            }
        }
    }
}

pub(crate) fn arg_str<'a>(function: &str, args: &'a [Rval], index: usize) -> Result<&'a str> {
    args.get(index)
        .and_then(Rval::as_scalar)
        .ok_or_else(|| ConvergeError::ArgumentError {
            function: function.into(),
            message: format!("argument {} must be a scalar", index + 1),
        })
}

pub(crate) fn arg_int(function: &str, args: &[Rval], index: usize) -> Result<i64> {
    let text = arg_str(function, args, index)?;
    text.trim().parse().map_err(|_| ConvergeError::ArgumentError {
        function: function.into(),
        message: format!("'{}' is not an integer", text),
    })
}

pub(crate) fn arg_real(function: &str, args: &[Rval], index: usize) -> Result<f64> {
    let text = arg_str(function, args, index)?;
    text.trim().parse().map_err(|_| ConvergeError::ArgumentError {
        function: function.into(),
        message: format!("'{}' is not a real number", text),
    })
}

pub(crate) fn arg_list<'a>(function: &str, args: &'a [Rval], index: usize) -> Result<&'a [Rval]> {
    args.get(index)
        .and_then(Rval::as_list)
        .ok_or_else(|| ConvergeError::ArgumentError {
            function: function.into(),
            message: format!("argument {} must be a list", index + 1),
        })
}

pub(crate) fn class_result(value: bool) -> Rval {
    Rval::from(if value { "any" } else { "!any" })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shout(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
        Ok(Rval::from(arg_str("shout", args, 0)?.to_uppercase()))
    }

    fn broken(_ctx: &EvaluationContext, _args: &[Rval]) -> Result<Rval> {
        Err(ConvergeError::FunctionFailed {
            name: "broken".into(),
            message: "always fails".into(),
        })
    }

    fn registry() -> FunctionRegistry {
        let mut registry = FunctionRegistry::new();
        registry.register(BuiltinFunction::new("shout", &[ArgType::String], shout));
        registry.register(BuiltinFunction::new("broken", &[], broken));
        registry
    }

    #[test]
    fn test_success() {
        let ctx = EvaluationContext::default();
        let call = FnCall::new("shout", vec![Rval::from("hi")]);
        let result = registry().evaluate(&ctx, &call, true).unwrap();
        assert_eq!(result.status, FnCallStatus::Success);
        assert_eq!(result.value, Rval::from("HI"));
    }

    #[test]
    fn test_unknown_function_is_an_error() {
        let ctx = EvaluationContext::default();
        let call = FnCall::new("nope", vec![]);
        let err = registry().evaluate(&ctx, &call, true).unwrap_err();
        assert!(matches!(err, ConvergeError::UnknownFunction { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_unresolved_arguments_defer() {
        let ctx = EvaluationContext::default();
        let call = FnCall::new("shout", vec![Rval::from("$(later)")]);
        let result = registry().evaluate(&ctx, &call, false).unwrap();
        assert_eq!(result.status, FnCallStatus::Deferred);
        assert_eq!(result.value, Rval::FnCall(call));
    }

    #[test]
    fn test_failure_preserves_call() {
        let ctx = EvaluationContext::default();
        let call = FnCall::new("broken", vec![]);
        let result = registry().evaluate(&ctx, &call, true).unwrap();
        assert_eq!(result.status, FnCallStatus::Failure);
        assert_eq!(result.value, Rval::FnCall(call));
    }

    #[test]
    fn test_signature_checks() {
        let ctx = EvaluationContext::default();
        let wrong_count = FnCall::new("shout", vec![]);
        let result = registry().evaluate(&ctx, &wrong_count, true).unwrap();
        assert_eq!(result.status, FnCallStatus::Failure);

        let wrong_type = FnCall::new("shout", vec![Rval::from(vec!["a"])]);
        let result = registry().evaluate(&ctx, &wrong_type, true).unwrap();
        assert_eq!(result.status, FnCallStatus::Failure);
    }

    #[test]
    fn test_status_merge() {
        assert_eq!(
            FnCallStatus::Success.merge(FnCallStatus::Deferred),
            FnCallStatus::Deferred
        );
        assert_eq!(
            FnCallStatus::Failure.merge(FnCallStatus::Deferred),
            FnCallStatus::Failure
        );
    }
}
