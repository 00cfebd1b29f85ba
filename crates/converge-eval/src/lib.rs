mod background;
mod classes;
mod context;
mod expand;
mod functions;
mod handlers;
mod iteration;
mod natives;
mod output;
mod promise;
mod scheduler;
mod scope;

pub use background::BackgroundPool;
pub use classes::{ClassContext, ClassScope};
pub use context::{meta_scope, EvaluationContext};
pub use expand::{
    check_self_reference, expand_fncall, expand_list, expand_rval, expand_scalar, scan, scan_into,
    Expansion, References,
};
pub use functions::{ArgType, BuiltinFunction, FnCallStatus, FnResult, FunctionImpl, FunctionRegistry};
pub use handlers::{
    ClassesHandler, HandlerRegistry, PromiseTypeHandler, ReportsHandler, VarsHandler, VarsTarget,
};
pub use iteration::IterationState;
pub use output::OutputSink;
pub use promise::{ExpandedPromise, PromiseId};
pub use scheduler::{RunReport, Scheduler, AGENT_TYPE_SEQUENCE};
pub use scope::{BindOutcome, BindPolicy, Binding, Scope, ScopeStore, CONST_SCOPE, SYS_SCOPE, THIS_SCOPE};
