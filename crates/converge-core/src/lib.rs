mod config;
mod error;
mod policy;
mod value;

pub use config::{AgentConfig, AgentSettings, EngineLimits, CONFIG_FILE};
pub use error::{ConvergeError, Result, SourceLocation};
pub use policy::{Bundle, BundleInvocation, Constraint, ControlBody, Policy, Promise};
pub use value::syntax;
pub use value::{DataType, FnCall, Rval, NULL_VALUE};
