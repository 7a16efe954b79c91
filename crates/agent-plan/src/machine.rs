//! Bounded driver for node-based agent loops

use crate::error::{PlanError, Result};
use async_trait::async_trait;
use tracing::debug;

/// A loop made of named nodes, advanced one node at a time
#[async_trait]
pub trait StateMachine: Send {
    /// Name of the node the next [`advance`](Self::advance) will run
    fn node(&self) -> &'static str;

    /// Whether the loop reached its end
    fn is_done(&self) -> bool;

    /// Run the current node and move to the next one
    async fn advance(&mut self) -> Result<()>;
}

/// Advance `machine` until it is done
///
/// Returns the number of node executions. Fails with
/// [`PlanError::IterationLimitExceeded`] instead of running node `limit + 1`.
pub async fn run_to_completion<M>(machine: &mut M, limit: usize) -> Result<usize>
where
    M: StateMachine + ?Sized,
{
    let mut executed = 0;
    while !machine.is_done() {
        if executed >= limit {
            return Err(PlanError::IterationLimitExceeded { limit });
        }
        let node = machine.node();
        executed += 1;
        debug!(node = node, step = executed, limit = limit, "Running node");
        machine.advance().await?;
    }
    Ok(executed)
}
