use super::{leave_via_transitions, select_outgoing_transitions, ActivityBehavior};
use crate::ops::OpContext;
use crate::reachability::ReachabilityIndex;
use async_trait::async_trait;
use stepcore::events::ExecutionId;
use stepcore::{EngineError, Result};

/// Inclusive (OR) gateway: joins the concurrent branches that were taken
/// and forks into every outgoing transition whose guard passes.
///
/// An arriving token parks at the gateway. The join fires only when no
/// other active sibling token can still reach the gateway — decided by
/// forward reachability over the process graph, under the concurrent-root
/// lock so overlapping decisions cannot race.
pub struct InclusiveGatewayBehavior;

#[async_trait]
impl ActivityBehavior for InclusiveGatewayBehavior {
    async fn execute(&self, ctx: &mut OpContext<'_>, execution: ExecutionId) -> Result<()> {
        let env = ctx.env;
        let def = env.definition_of(ctx.tree, execution)?;
        let reachability = env.reachability_of(ctx.tree, execution)?;
        let activity_id = ctx.tree.get(execution)?.activity.clone().ok_or_else(|| {
            EngineError::Invariant(format!("execution '{}' is not at an activity", execution))
        })?;

        ctx.tree.inactivate(execution)?;
        let concurrent_root = if ctx.tree.is_concurrent(execution) {
            ctx.tree.get(execution)?.parent.ok_or_else(|| {
                EngineError::Invariant("concurrent execution without parent".into())
            })?
        } else {
            execution
        };
        let _guard = env.locks.acquire(concurrent_root)?;

        if active_concurrent_executions_exist(ctx, execution, &activity_id, &reachability)? {
            tracing::info!("element with id '{}' does not activate", activity_id);
            return Ok(());
        }

        tracing::info!("element with id '{}' activates", activity_id);
        let joined = ctx
            .tree
            .find_inactive_concurrent_executions(execution, &activity_id)?;
        let activity = def.find_activity(&activity_id)?;
        let transitions = select_outgoing_transitions(ctx, execution, activity)?;
        leave_via_transitions(ctx, execution, transitions, joined)
    }
}

/// Whether any active sibling token under the concurrent root can still
/// reach the gateway. A token mid-transition counts from the transition's
/// destination.
fn active_concurrent_executions_exist(
    ctx: &OpContext<'_>,
    execution: ExecutionId,
    gateway_activity: &str,
    reachability: &ReachabilityIndex,
) -> Result<bool> {
    if ctx.tree.is_concurrent(execution) {
        let parent = ctx.tree.get(execution)?.parent.ok_or_else(|| {
            EngineError::Invariant("concurrent execution without parent".into())
        })?;
        for leaf in ctx.tree.leaf_executions(parent) {
            let e = ctx.tree.get(leaf)?;
            if !e.is_active {
                continue;
            }
            let position = e
                .transition
                .as_ref()
                .map(|t| t.destination.clone())
                .or_else(|| e.activity.clone());
            let Some(position) = position else { continue };
            if reachability.is_reachable(&position, gateway_activity) {
                tracing::info!("an active concurrent execution was found at '{}'", position);
                return Ok(true);
            }
        }
        Ok(false)
    } else {
        // non-concurrent arrival: the token itself is the only candidate,
        // and it was parked on arrival
        Ok(ctx.tree.is_active(execution))
    }
}
