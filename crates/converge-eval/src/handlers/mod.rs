mod classes;
mod reports;
mod vars;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use converge_core::Result;

use crate::context::EvaluationContext;
use crate::promise::ExpandedPromise;

pub use classes::ClassesHandler;
pub use reports::ReportsHandler;
pub use vars::{VarsHandler, VarsTarget};

/// Consumer of expanded promises of one type. Handlers report back only by
/// changing the context; `Err` from a fatal error aborts the run.
pub trait PromiseTypeHandler: Send + Sync {
    /// Called once per pass before the first promise of the type. Returning
    /// `false` skips the type for this pass.
    fn init(&self, _ctx: &mut EvaluationContext) -> Result<bool> {
        Ok(true)
    }

    fn handle(&self, ctx: &mut EvaluationContext, promise: &ExpandedPromise) -> Result<()>;

    fn teardown(&self, _ctx: &mut EvaluationContext) -> Result<()> {
        Ok(())
    }

    fn supports_background(&self) -> bool {
        false
    }

    /// Repeatable types are never marked done.
    fn repeatable(&self) -> bool {
        false
    }

    /// True when the type's effects live in the bundle scope. Its done flags
    /// are cleared whenever that scope is reset for a new invocation.
    fn scope_bound(&self) -> bool {
        false
    }
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn PromiseTypeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("meta", VarsHandler::new(VarsTarget::Meta));
        registry.register("vars", VarsHandler::new(VarsTarget::Bundle));
        registry.register("classes", ClassesHandler);
        registry.register("reports", ReportsHandler);
        registry
    }

    pub fn register(&mut self, promise_type: &str, handler: impl PromiseTypeHandler + 'static) {
        self.handlers
            .insert(promise_type.to_string(), Arc::new(handler));
    }

    pub fn get(&self, promise_type: &str) -> Option<Arc<dyn PromiseTypeHandler>> {
        self.handlers.get(promise_type).cloned()
    }

    pub fn contains(&self, promise_type: &str) -> bool {
        self.handlers.contains_key(promise_type)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("HandlerRegistry").field("types", &names).finish()
    }
}
