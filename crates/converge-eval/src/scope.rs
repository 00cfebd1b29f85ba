use std::collections::HashMap;

use converge_core::{syntax, ConvergeError, DataType, Result, Rval, SourceLocation};
use indexmap::IndexMap;
use tracing::{trace, warn};

pub const THIS_SCOPE: &str = "this";
pub const CONST_SCOPE: &str = "const";
pub const SYS_SCOPE: &str = "sys";

#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: String,
    pub value: Rval,
    pub data_type: DataType,
    pub location: Option<SourceLocation>,
}

impl Binding {
    pub fn new(name: impl Into<String>, value: impl Into<Rval>) -> Self {
        let value = value.into();
        Self {
            name: name.into(),
            data_type: DataType::of(&value),
            value,
            location: None,
        }
    }

    pub fn typed(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn at(mut self, location: Option<SourceLocation>) -> Self {
        self.location = location;
        self
    }
}

/// Whether an existing binding may be replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindPolicy {
    #[default]
    Constant,
    Mutable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    Bound,
    Overwritten,
    Unchanged,
    Rejected,
}

#[derive(Debug, Clone, Default)]
pub struct Scope {
    name: String,
    bindings: IndexMap<String, Binding>,
}

impl Scope {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            bindings: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.values()
    }
}

#[derive(Debug, Clone)]
pub struct ScopeStore {
    scopes: HashMap<String, Scope>,
    current: String,
    capacity: usize,
}

impl ScopeStore {
    pub fn new(capacity: usize) -> Self {
        let mut store = Self {
            scopes: HashMap::new(),
            current: THIS_SCOPE.to_string(),
            capacity,
        };
        store.create_scope(THIS_SCOPE);
        store
    }

    /// Creates the scope if it does not exist yet.
    pub fn create_scope(&mut self, name: &str) {
        self.scopes
            .entry(name.to_string())
            .or_insert_with(|| Scope::new(name));
    }

    pub fn delete_scope(&mut self, name: &str) -> bool {
        self.scopes.remove(name).is_some()
    }

    /// Drops every binding, leaving an empty scope under the same name.
    pub fn reset_scope(&mut self, name: &str) {
        self.scopes.insert(name.to_string(), Scope::new(name));
    }

    /// Replaces `to` with a copy of `from`'s bindings.
    pub fn copy_scope(&mut self, to: &str, from: &str) {
        let mut copy = self
            .scopes
            .get(from)
            .cloned()
            .unwrap_or_else(|| Scope::new(from));
        copy.name = to.to_string();
        self.scopes.insert(to.to_string(), copy);
    }

    pub fn has_scope(&self, name: &str) -> bool {
        self.scopes.contains_key(name)
    }

    pub fn scope(&self, name: &str) -> Option<&Scope> {
        self.scopes.get(name)
    }

    pub fn set_current(&mut self, name: &str) -> Result<()> {
        if !self.scopes.contains_key(name) {
            return Err(ConvergeError::UnknownScope { scope: name.into() });
        }
        self.current = name.to_string();
        Ok(())
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn bind(&mut self, scope: &str, binding: Binding, policy: BindPolicy) -> Result<BindOutcome> {
        if binding.name.is_empty() {
            return Err(ConvergeError::InvalidVariable {
                name: binding.name,
            });
        }

        let capacity = self.capacity;
        let target = self
            .scopes
            .get_mut(scope)
            .ok_or_else(|| ConvergeError::UnknownScope { scope: scope.into() })?;

        if let Some(existing) = target.bindings.get(&binding.name) {
            if existing.value == binding.value {
                return Ok(BindOutcome::Unchanged);
            }
            if policy == BindPolicy::Constant {
                warn!(
                    "Redefinition of constant variable \"{}.{}\" ignored (keeping {}, rejected {})",
                    scope, binding.name, existing.value, binding.value
                );
                return Ok(BindOutcome::Rejected);
            }
            trace!("Overwriting {}.{}", scope, binding.name);
            target.bindings.insert(binding.name.clone(), binding);
            return Ok(BindOutcome::Overwritten);
        }

        // `this` starts as a full copy of a bundle scope plus per-promise bindings
        if scope != THIS_SCOPE && target.bindings.len() >= capacity {
            return Err(ConvergeError::ScopeFull {
                scope: scope.into(),
                capacity,
            });
        }

        trace!("Binding {}.{} = {}", scope, binding.name, binding.value);
        target.bindings.insert(binding.name.clone(), binding);
        Ok(BindOutcome::Bound)
    }

    /// Resolves `name` in `scope`. An exact binding wins; otherwise a
    /// `scope.name` form is resolved directly in the named scope.
    pub fn lookup(&self, scope: &str, name: &str) -> Option<&Binding> {
        if let Some(found) = self.scopes.get(scope).and_then(|s| s.get(name)) {
            return Some(found);
        }
        let (qualifier, bare) = syntax::split_qualified(name)?;
        self.scopes.get(qualifier).and_then(|s| s.get(bare))
    }

    pub fn lookup_current(&self, name: &str) -> Option<&Binding> {
        self.lookup(&self.current, name)
    }

    pub fn unbind(&mut self, scope: &str, name: &str) -> Option<Binding> {
        self.scopes
            .get_mut(scope)
            .and_then(|s| s.bindings.shift_remove(name))
    }
}

impl Default for ScopeStore {
    fn default() -> Self {
        Self::new(converge_core::EngineLimits::default().max_scope_bindings)
    }
}
