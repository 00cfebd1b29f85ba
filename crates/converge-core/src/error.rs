use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct SourceLocation {
    pub file: Option<String>,
    pub line: usize,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}", file, self.line),
            None => write!(f, "line {}", self.line),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ConvergeError {
    #[error("Expansion overflow: result exceeds {limit} bytes while expanding '{text}'")]
    ExpansionOverflow { limit: usize, text: String },

    #[error("Scope '{scope}' is full ({capacity} bindings)")]
    ScopeFull { scope: String, capacity: usize },

    #[error("Variable '{variable}' contains itself (non-convergent): promise cannot keep itself")]
    SelfReference { variable: String, value: String },

    #[error("Bundle '{name}' listed in the bundlesequence was not found")]
    MissingBundle { name: String },

    #[error("Bundle '{name}' expects {expected} argument(s), {given} given")]
    BundleArguments {
        name: String,
        expected: usize,
        given: usize,
    },

    #[error("Promise handler for '{promise_type}' aborted: {message}")]
    HandlerAbort {
        promise_type: String,
        message: String,
    },

    #[error("No such function '{name}()'")]
    UnknownFunction { name: String },

    #[error("Argument error in {function}(): {message}")]
    ArgumentError { function: String, message: String },

    #[error("Function {name}() failed: {message}")]
    FunctionFailed { name: String, message: String },

    #[error("Invalid variable identifier '{name}'")]
    InvalidVariable { name: String },

    #[error("Unknown scope '{scope}'")]
    UnknownScope { scope: String },

    #[error("Malformed class expression '{expression}': {message}")]
    ClassExpression { expression: String, message: String },

    #[error("Policy error: {message}")]
    PolicyError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("I/O error: {path}: {message}")]
    IoError { path: String, message: String },

    #[error("Glob error: {message}")]
    GlobError { message: String },

    #[error("in bundle '{bundle}', {promise_type} promise '{promiser}': {source}")]
    InPromise {
        bundle: String,
        promise_type: String,
        promiser: String,
        source: Box<ConvergeError>,
    },
}

impl ConvergeError {
    pub fn in_promise(
        self,
        bundle: impl Into<String>,
        promise_type: impl Into<String>,
        promiser: impl Into<String>,
    ) -> Self {
        match self {
            wrapped @ ConvergeError::InPromise { .. } => wrapped,
            other => ConvergeError::InPromise {
                bundle: bundle.into(),
                promise_type: promise_type.into(),
                promiser: promiser.into(),
                source: Box::new(other),
            },
        }
    }

    pub fn inner_error(&self) -> &ConvergeError {
        match self {
            ConvergeError::InPromise { source, .. } => source.inner_error(),
            other => other,
        }
    }

    /// Fatal errors terminate the run; everything else is local to one promise
    /// and is retried or skipped on the next pass.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.inner_error(),
            ConvergeError::ExpansionOverflow { .. }
                | ConvergeError::ScopeFull { .. }
                | ConvergeError::SelfReference { .. }
                | ConvergeError::MissingBundle { .. }
                | ConvergeError::BundleArguments { .. }
                | ConvergeError::HandlerAbort { .. }
                | ConvergeError::PolicyError { .. }
                | ConvergeError::ConfigError { .. }
                | ConvergeError::IoError { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ConvergeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let overflow = ConvergeError::ExpansionOverflow {
            limit: 10,
            text: "$(x)".into(),
        };
        assert!(overflow.is_fatal());

        let unknown = ConvergeError::UnknownFunction { name: "nope".into() };
        assert!(!unknown.is_fatal());
    }

    #[test]
    fn test_in_promise_keeps_classification() {
        let err = ConvergeError::SelfReference {
            variable: "x".into(),
            value: "$(x)".into(),
        }
        .in_promise("main", "vars", "x");

        assert!(err.is_fatal());
        assert!(matches!(err.inner_error(), ConvergeError::SelfReference { .. }));
        assert_eq!(
            err.to_string(),
            "in bundle 'main', vars promise 'x': Variable 'x' contains itself (non-convergent): promise cannot keep itself"
        );
    }

    #[test]
    fn test_in_promise_does_not_nest() {
        let err = ConvergeError::MissingBundle { name: "b".into() }
            .in_promise("main", "methods", "call")
            .in_promise("outer", "methods", "again");

        match err {
            ConvergeError::InPromise { bundle, .. } => assert_eq!(bundle, "main"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
