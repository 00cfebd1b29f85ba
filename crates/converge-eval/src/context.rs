use std::collections::HashSet;
use std::sync::Arc;

use converge_core::{AgentConfig, EngineLimits, Result, Rval};
use tracing::debug;

use crate::classes::{ClassContext, ClassScope};
use crate::functions::FunctionRegistry;
use crate::output::OutputSink;
use crate::promise::PromiseId;
use crate::scope::{BindPolicy, Binding, ScopeStore, CONST_SCOPE, SYS_SCOPE, THIS_SCOPE};

/// Everything one run reads and writes. Cloning gives an independent
/// snapshot that still shares the function registry and output sink.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub scopes: ScopeStore,
    pub classes: ClassContext,
    functions: Arc<FunctionRegistry>,
    limits: EngineLimits,
    done: HashSet<PromiseId>,
    output: OutputSink,
}

impl EvaluationContext {
    pub fn new(limits: EngineLimits) -> Self {
        let mut ctx = Self {
            scopes: ScopeStore::new(limits.max_scope_bindings),
            classes: ClassContext::with_host_classes(),
            functions: Arc::new(FunctionRegistry::with_builtins()),
            limits,
            done: HashSet::new(),
            output: OutputSink::stdout(),
        };
        ctx.install_reserved_scopes();
        ctx
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        let mut ctx = Self::new(config.limits);
        for class in &config.agent.negate {
            ctx.classes.negate(class);
        }
        for class in &config.agent.define {
            ctx.classes.define_hard(class);
        }
        ctx
    }

    pub fn with_output(mut self, output: OutputSink) -> Self {
        self.output = output;
        self
    }

    pub fn with_functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = Arc::new(functions);
        self
    }

    fn install_reserved_scopes(&mut self) {
        let constants = [
            ("dollar", "$"),
            ("n", "\n"),
            ("r", "\r"),
            ("t", "\t"),
            ("endl", "\n"),
        ];
        let workdir = std::env::current_dir()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| ".".to_string());
        let system = [
            ("os", std::env::consts::OS.to_string()),
            ("arch", std::env::consts::ARCH.to_string()),
            ("family", std::env::consts::FAMILY.to_string()),
            ("cf_version", env!("CARGO_PKG_VERSION").to_string()),
            ("workdir", workdir),
        ];

        self.scopes.create_scope(CONST_SCOPE);
        self.scopes.create_scope(SYS_SCOPE);
        for (name, value) in constants {
            let _ = self
                .scopes
                .bind(CONST_SCOPE, Binding::new(name, value), BindPolicy::Constant);
        }
        for (name, value) in system {
            let _ = self
                .scopes
                .bind(SYS_SCOPE, Binding::new(name, value), BindPolicy::Constant);
        }
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn limits(&self) -> EngineLimits {
        self.limits
    }

    pub fn output(&self) -> &OutputSink {
        &self.output
    }

    pub fn is_done(&self, id: &PromiseId) -> bool {
        self.done.contains(id)
    }

    pub fn mark_done(&mut self, id: PromiseId) {
        self.done.insert(id);
    }

    pub fn clear_done(&mut self, id: &PromiseId) -> bool {
        self.done.remove(id)
    }

    pub fn done_count(&self) -> usize {
        self.done.len()
    }

    /// Starts a bundle evaluation: fresh bundle scope, bundle classes cleared.
    pub fn begin_bundle(&mut self, bundle: &str) -> Result<()> {
        debug!("Resetting scope \"{}\"", bundle);
        self.classes.clear_bundle();
        self.scopes.reset_scope(bundle);
        self.scopes.create_scope(&meta_scope(bundle));
        self.scopes.set_current(bundle)
    }

    /// Binds `value` into a scope, creating the scope first if needed.
    pub fn bind(&mut self, scope: &str, name: &str, value: impl Into<Rval>, policy: BindPolicy) -> Result<()> {
        self.scopes.create_scope(scope);
        self.scopes.bind(scope, Binding::new(name, value), policy)?;
        Ok(())
    }

    /// Makes `this` a copy of the bundle scope and selects it.
    pub fn enter_promise(&mut self, bundle: &str) -> Result<()> {
        self.scopes.copy_scope(THIS_SCOPE, bundle);
        self.scopes.set_current(THIS_SCOPE)
    }

    pub fn define_class(&mut self, name: &str, scope: ClassScope) -> bool {
        self.classes.define(name, scope)
    }
}

impl Default for EvaluationContext {
    fn default() -> Self {
        Self::new(EngineLimits::default())
    }
}

pub fn meta_scope(bundle: &str) -> String {
    format!("{bundle}_meta")
}
