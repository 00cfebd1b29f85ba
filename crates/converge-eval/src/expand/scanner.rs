use converge_core::syntax::{self, SCALAR_SIGIL};
use converge_core::{Result, Rval};
use tracing::trace;

use super::expand_scalar;
use crate::context::EvaluationContext;

/// Variable references found in a value, split by what they currently
/// resolve to. Names are recorded, never their expansions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct References {
    pub scalars: Vec<String>,
    pub lists: Vec<String>,
}

impl References {
    fn add_scalar(&mut self, name: String) {
        if !self.scalars.contains(&name) {
            self.scalars.push(name);
        }
    }

    /// Lists found inside a nested token go to the front.
    fn add_list(&mut self, name: String, nested: bool) {
        if self.lists.contains(&name) {
            return;
        }
        if nested {
            self.lists.insert(0, name);
        } else {
            self.lists.push(name);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.scalars.is_empty() && self.lists.is_empty()
    }
}

pub fn scan(ctx: &EvaluationContext, value: &Rval) -> Result<References> {
    let mut refs = References::default();
    scan_into(ctx, value, &mut refs)?;
    Ok(refs)
}

pub fn scan_into(ctx: &EvaluationContext, value: &Rval, refs: &mut References) -> Result<()> {
    match value {
        Rval::Scalar(text) => scan_scalar(ctx, text, 0, refs),
        Rval::List(items) => items.iter().try_for_each(|item| scan_into(ctx, item, refs)),
        Rval::FnCall(call) => call.args.iter().try_for_each(|arg| scan_into(ctx, arg, refs)),
    }
}

fn scan_scalar(ctx: &EvaluationContext, text: &str, level: usize, refs: &mut References) -> Result<()> {
    for var in syntax::references(text, SCALAR_SIGIL) {
        let (name, _) = expand_scalar(ctx, var.inner)?;
        match ctx.scopes.lookup_current(&name) {
            Some(binding) if binding.value.is_list() => {
                trace!("Found list reference {} at level {}", name, level);
                refs.add_list(name, level > 0);
            }
            Some(_) => refs.add_scalar(name),
            None if syntax::is_expandable(&name) => {
                trace!("Checking nested references in {}", name);
                scan_scalar(ctx, &name, level + 1, refs)?;
            }
            None => {}
        }
    }
    Ok(())
}
