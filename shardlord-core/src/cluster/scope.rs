//! Scoped cluster runs
//!
//! Runs a body against an orchestrator and tears the cluster down exactly
//! once afterwards, whether the body finished, failed or was interrupted.

use futures::future::BoxFuture;
use tracing::{error, info};

use super::orchestrator::ClusterOrchestrator;
use crate::engine::Engine;
use crate::error::Result;
use crate::runtime::ShutdownSignal;

/// How a scoped run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeExit<R> {
    /// The body ran to completion
    Completed(R),
    /// Shutdown was signalled before the body finished
    Interrupted,
}

impl<R> ScopeExit<R> {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, ScopeExit::Interrupted)
    }

    /// The body's value, if it completed
    pub fn completed(self) -> Option<R> {
        match self {
            ScopeExit::Completed(value) => Some(value),
            ScopeExit::Interrupted => None,
        }
    }
}

impl<E: Engine> ClusterOrchestrator<E> {
    /// Run `body`, then tear down
    ///
    /// The body is abandoned at its next suspension point once `shutdown`
    /// fires. If both the body and teardown fail, the body's error is
    /// returned and the teardown failure is logged.
    pub async fn scoped<R, F>(mut self, shutdown: &ShutdownSignal, body: F) -> Result<ScopeExit<R>>
    where
        F: for<'a> FnOnce(&'a mut ClusterOrchestrator<E>) -> BoxFuture<'a, Result<R>>,
    {
        let mut interrupt = shutdown.subscribe();

        let outcome = if shutdown.is_triggered() {
            None
        } else {
            let work = body(&mut self);
            tokio::select! {
                result = work => Some(result),
                _ = interrupt.recv() => None,
            }
        };

        if outcome.is_none() {
            info!("Shutdown signalled; tearing cluster down");
        }

        let teardown = self.teardown().await;

        match (outcome, teardown) {
            (Some(Ok(value)), Ok(())) => Ok(ScopeExit::Completed(value)),
            (None, Ok(())) => Ok(ScopeExit::Interrupted),
            (Some(Err(err)), Ok(())) => Err(err),
            (Some(Err(err)), Err(teardown_err)) => {
                error!(error = %teardown_err, "Teardown after failed run left nodes behind");
                Err(err)
            }
            (_, Err(teardown_err)) => Err(teardown_err),
        }
    }
}
