use std::sync::Arc;

use converge_core::ConvergeError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::context::EvaluationContext;
use crate::handlers::PromiseTypeHandler;
use crate::promise::ExpandedPromise;

/// Bounded pool for background promises. A request that finds no free
/// slot is refused and the caller runs it in the foreground instead.
pub struct BackgroundPool {
    permits: Arc<Semaphore>,
    workers: JoinSet<std::result::Result<(), (String, ConvergeError)>>,
    spawned: usize,
}

impl BackgroundPool {
    pub fn new(max_children: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_children)),
            workers: JoinSet::new(),
            spawned: 0,
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn spawned(&self) -> usize {
        self.spawned
    }

    /// Hands the promise to a worker with its own context snapshot. Gives the
    /// snapshot and promise back when every slot is taken.
    pub fn try_spawn(
        &mut self,
        handler: Arc<dyn PromiseTypeHandler>,
        snapshot: EvaluationContext,
        promise: ExpandedPromise,
    ) -> std::result::Result<(), (EvaluationContext, ExpandedPromise)> {
        let permit: OwnedSemaphorePermit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!(
                    "Background limit reached, running '{}' in the foreground",
                    promise.promiser
                );
                return Err((snapshot, promise));
            }
        };

        debug!("Backgrounding '{}'", promise.promiser);
        self.spawned += 1;
        self.workers.spawn_blocking(move || {
            let _permit = permit;
            let mut ctx = snapshot;
            handler
                .handle(&mut ctx, &promise)
                .map_err(|e| (promise.id.to_string(), e))
        });
        Ok(())
    }

    /// Waits for every worker. Worker errors are logged, never propagated.
    pub async fn join_all(&mut self) -> usize {
        let mut failures = 0;
        while let Some(result) = self.workers.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err((promise, e))) => {
                    failures += 1;
                    warn!("Background promise {} failed: {}", promise, e);
                }
                Err(join_error) => {
                    failures += 1;
                    error!("Background worker panicked: {}", join_error);
                }
            }
        }
        failures
    }
}
