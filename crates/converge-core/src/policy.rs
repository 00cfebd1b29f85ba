//! Policy AST handed to the engine by the external parser.
//!
//! The engine never mutates a loaded `Policy`; expansion always works on
//! copies of promises and constraints.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{ConvergeError, Result, SourceLocation};
use crate::value::{DataType, Rval};

fn default_guard() -> String {
    "any".to_string()
}

fn default_bundle_type() -> String {
    "agent".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub lval: String,
    pub rval: Rval,
    #[serde(default, rename = "type")]
    pub data_type: DataType,
    #[serde(default = "default_guard")]
    pub classes: String,
}

impl Constraint {
    pub fn new(lval: impl Into<String>, rval: impl Into<Rval>) -> Self {
        Self {
            lval: lval.into(),
            rval: rval.into(),
            data_type: DataType::None,
            classes: default_guard(),
        }
    }

    pub fn guarded(mut self, classes: impl Into<String>) -> Self {
        self.classes = classes.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Promise {
    pub promiser: String,
    #[serde(default)]
    pub promisee: Option<Rval>,
    #[serde(default = "default_guard")]
    pub classes: String,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub location: Option<SourceLocation>,
}

impl Promise {
    pub fn new(promiser: impl Into<String>) -> Self {
        Self {
            promiser: promiser.into(),
            promisee: None,
            classes: default_guard(),
            constraints: Vec::new(),
            location: None,
        }
    }

    pub fn with(mut self, lval: impl Into<String>, rval: impl Into<Rval>) -> Self {
        self.constraints.push(Constraint::new(lval, rval));
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn guarded(mut self, classes: impl Into<String>) -> Self {
        self.classes = classes.into();
        self
    }

    pub fn with_promisee(mut self, promisee: impl Into<Rval>) -> Self {
        self.promisee = Some(promisee.into());
        self
    }

    /// Last constraint with this lval, ignoring class guards.
    pub fn constraint(&self, lval: &str) -> Option<&Constraint> {
        self.constraints.iter().rev().find(|c| c.lval == lval)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub name: String,
    #[serde(default = "default_bundle_type", rename = "type")]
    pub bundle_type: String,
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub promise_types: IndexMap<String, Vec<Promise>>,
}

impl Bundle {
    pub fn new(name: impl Into<String>, bundle_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bundle_type: bundle_type.into(),
            parameters: Vec::new(),
            promise_types: IndexMap::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: &[&str]) -> Self {
        self.parameters = parameters.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn promise(mut self, promise_type: &str, promise: Promise) -> Self {
        self.promise_types
            .entry(promise_type.to_string())
            .or_default()
            .push(promise);
        self
    }

    pub fn promises(&self, promise_type: &str) -> Option<&[Promise]> {
        self.promise_types.get(promise_type).map(Vec::as_slice)
    }

    pub fn is_runnable(&self) -> bool {
        matches!(self.bundle_type.as_str(), "agent" | "common")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlBody {
    #[serde(default)]
    pub bundlesequence: Vec<Rval>,
}

/// One entry of the bundle sequence: `name` or `name(arg, ...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleInvocation {
    pub name: String,
    pub args: Vec<Rval>,
}

impl BundleInvocation {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn from_rval(entry: &Rval) -> Result<Self> {
        match entry {
            Rval::Scalar(name) => Ok(Self::named(name.clone())),
            Rval::FnCall(call) => Ok(Self {
                name: call.name.clone(),
                args: call.args.clone(),
            }),
            Rval::List(_) => Err(ConvergeError::PolicyError {
                message: format!("Illegal item found in bundlesequence: {entry}"),
            }),
        }
    }

    /// Parses the command-line form `name` or `name(a,b)`.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        match text.find('(') {
            None => Ok(Self::named(text)),
            Some(open) if text.ends_with(')') => {
                let inner = &text[open + 1..text.len() - 1];
                let args = if inner.trim().is_empty() {
                    Vec::new()
                } else {
                    inner.split(',').map(|a| Rval::from(a.trim())).collect()
                };
                Ok(Self {
                    name: text[..open].trim().to_string(),
                    args,
                })
            }
            Some(_) => Err(ConvergeError::PolicyError {
                message: format!("Malformed bundle reference '{text}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub control: ControlBody,
    #[serde(default)]
    pub bundles: Vec<Bundle>,
}

impl Policy {
    pub fn from_json(source: &str) -> Result<Self> {
        let policy: Policy =
            serde_json::from_str(source).map_err(|e| ConvergeError::PolicyError {
                message: e.to_string(),
            })?;
        Ok(policy.normalized())
    }

    /// Concatenates several documents; later control bodies extend the sequence.
    pub fn merge(&mut self, other: Policy) {
        self.control
            .bundlesequence
            .extend(other.control.bundlesequence);
        self.bundles.extend(other.bundles);
    }

    pub fn bundle(&self, name: &str) -> Option<&Bundle> {
        self.bundles
            .iter()
            .find(|b| b.name == name && b.is_runnable())
    }

    pub fn bundle_sequence(&self) -> Result<Vec<BundleInvocation>> {
        self.control
            .bundlesequence
            .iter()
            .map(BundleInvocation::from_rval)
            .collect()
    }

    fn normalized(mut self) -> Self {
        for bundle in &mut self.bundles {
            for promises in bundle.promise_types.values_mut() {
                for promise in promises.iter_mut() {
                    promise.promisee = promise.promisee.take().map(Rval::flattened);
                    for constraint in &mut promise.constraints {
                        constraint.rval = std::mem::replace(&mut constraint.rval, Rval::List(vec![])).flattened();
                    }
                }
            }
        }
        self
    }
}
