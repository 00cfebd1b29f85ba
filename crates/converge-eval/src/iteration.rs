use converge_core::{DataType, Result, Rval, NULL_VALUE};
use tracing::debug;

use crate::context::EvaluationContext;
use crate::expand::expand_rval;
use crate::scope::{BindPolicy, Binding, THIS_SCOPE};

#[derive(Debug, Clone)]
struct Slot {
    name: String,
    values: Vec<Rval>,
    index: usize,
}

/// Odometer over the Cartesian product of the list references of one
/// promise. The last slot turns fastest.
#[derive(Debug, Clone)]
pub struct IterationState {
    slots: Vec<Slot>,
    finished: bool,
}

impl IterationState {
    pub fn begin(ctx: &EvaluationContext, lists: &[String]) -> Result<Self> {
        let mut slots = Vec::with_capacity(lists.len());

        for name in lists {
            let items = match ctx.scopes.lookup_current(name).map(|b| &b.value) {
                Some(Rval::List(items)) => items,
                _ => {
                    debug!("List {} is no longer defined, not iterating over it", name);
                    continue;
                }
            };

            let mut values = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Rval::Scalar(s) if s == NULL_VALUE => {}
                    Rval::FnCall(_) => match expand_rval(ctx, item)?.value {
                        Rval::List(inner) => values.extend(inner.into_iter().filter(|v| !is_null(v))),
                        value => values.push(value),
                    },
                    other => values.push(other.clone()),
                }
            }

            slots.push(Slot {
                name: name.clone(),
                values,
                index: 0,
            });
        }

        let finished = slots.iter().any(|slot| slot.values.is_empty());
        Ok(Self { slots, finished })
    }

    /// True when some list had nothing to offer, so no combination exists.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().any(|slot| slot.values.is_empty())
    }

    pub fn combinations(&self) -> usize {
        self.slots.iter().map(|slot| slot.values.len()).product()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn current(&self) -> Vec<(&str, &Rval)> {
        self.slots
            .iter()
            .filter_map(|slot| slot.values.get(slot.index).map(|v| (slot.name.as_str(), v)))
            .collect()
    }

    /// Binds the current combination into `this` under each list's name.
    pub fn bind_current(&self, ctx: &mut EvaluationContext) -> Result<()> {
        for (name, value) in self.current() {
            let binding = Binding::new(name, value.clone()).typed(DataType::String);
            ctx.scopes.bind(THIS_SCOPE, binding, BindPolicy::Mutable)?;
        }
        Ok(())
    }

    pub fn advance(&mut self) -> bool {
        if self.finished {
            return false;
        }
        for slot in self.slots.iter_mut().rev() {
            slot.index += 1;
            if slot.index < slot.values.len() {
                return true;
            }
            slot.index = 0;
        }
        self.finished = true;
        false
    }
}

fn is_null(value: &Rval) -> bool {
    value.as_scalar() == Some(NULL_VALUE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> EvaluationContext {
        let mut ctx = EvaluationContext::default();
        ctx.bind("main", "x", vec!["1", "2"], BindPolicy::Constant).unwrap();
        ctx.bind("main", "y", vec!["a", "b", "c"], BindPolicy::Constant).unwrap();
        ctx.bind("main", "empty", Rval::List(vec![]), BindPolicy::Constant).unwrap();
        ctx.bind("main", "nulls", vec!["cf_null", "cf_null"], BindPolicy::Constant).unwrap();
        ctx.bind("main", "sparse", vec!["cf_null", "p", "cf_null", "q"], BindPolicy::Constant)
            .unwrap();
        ctx.enter_promise("main").unwrap();
        ctx
    }

    fn collect(state: &mut IterationState) -> Vec<Vec<String>> {
        let mut seen = Vec::new();
        if state.is_finished() {
            return seen;
        }
        loop {
            seen.push(state.current().iter().map(|(_, v)| v.to_string()).collect());
            if !state.advance() {
                break;
            }
        }
        seen
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_list_in_order() {
        let ctx = ctx();
        let mut state = IterationState::begin(&ctx, &names(&["y"])).unwrap();
        assert_eq!(collect(&mut state), vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn test_cartesian_product_last_varies_fastest() {
        let ctx = ctx();
        let mut state = IterationState::begin(&ctx, &names(&["x", "y"])).unwrap();
        assert_eq!(state.combinations(), 6);
        let seen = collect(&mut state);
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[0], vec!["1", "a"]);
        assert_eq!(seen[1], vec!["1", "b"]);
        assert_eq!(seen[2], vec!["1", "c"]);
        assert_eq!(seen[3], vec!["2", "a"]);
    }

    #[test]
    fn test_no_lists_means_one_iteration() {
        let ctx = ctx();
        let mut state = IterationState::begin(&ctx, &[]).unwrap();
        assert!(!state.is_finished());
        assert_eq!(collect(&mut state).len(), 1);
    }

    #[test]
    fn test_empty_list_means_no_iterations() {
        let ctx = ctx();
        let mut state = IterationState::begin(&ctx, &names(&["x", "empty"])).unwrap();
        assert!(state.is_empty());
        assert!(collect(&mut state).is_empty());
        assert!(!state.advance());
    }

    #[test]
    fn test_null_elements_are_skipped() {
        let ctx = ctx();
        let mut state = IterationState::begin(&ctx, &names(&["sparse"])).unwrap();
        assert_eq!(collect(&mut state), vec![vec!["p"], vec!["q"]]);

        let state = IterationState::begin(&ctx, &names(&["nulls"])).unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn test_function_elements_are_evaluated() {
        let mut ctx = ctx();
        let list = Rval::List(vec![
            Rval::from("plain"),
            Rval::call("upcase", vec![Rval::from("loud")]),
        ]);
        ctx.bind("main", "calls", list, BindPolicy::Constant).unwrap();
        ctx.enter_promise("main").unwrap();

        let mut state = IterationState::begin(&ctx, &names(&["calls"])).unwrap();
        assert_eq!(collect(&mut state), vec![vec!["plain"], vec!["LOUD"]]);
    }

    #[test]
    fn test_bind_current_into_this() {
        let mut ctx = ctx();
        let mut state = IterationState::begin(&ctx, &names(&["x"])).unwrap();
        state.advance();
        state.bind_current(&mut ctx).unwrap();
        assert_eq!(
            ctx.scopes.lookup(THIS_SCOPE, "x").unwrap().value,
            Rval::from("2")
        );
        assert_eq!(
            crate::expand::expand_scalar(&ctx, "n=$(x)").unwrap(),
            ("n=2".to_string(), true)
        );
    }
}
