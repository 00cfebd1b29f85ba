use converge_core::Result;
use tracing::debug;

use super::PromiseTypeHandler;
use crate::context::EvaluationContext;
use crate::promise::ExpandedPromise;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReportsHandler;

impl PromiseTypeHandler for ReportsHandler {
    fn handle(&self, ctx: &mut EvaluationContext, promise: &ExpandedPromise) -> Result<()> {
        if !promise.resolved {
            debug!("Report '{}' not yet fully expanded", promise.promiser);
            return Ok(());
        }
        ctx.output().write_line(&format!("R: {}", promise.promiser));
        Ok(())
    }

    fn supports_background(&self) -> bool {
        true
    }
}
