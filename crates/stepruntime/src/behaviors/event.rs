use super::{execute_activity, leave_activity, ActivityBehavior};
use crate::ops::{AtomicOperation, OpContext};
use async_trait::async_trait;
use stepcore::events::{ExecutionId, SubscriptionKind};
use stepcore::{props, DefinitionError, DelegateContext, EngineError, Result};

/// None end event: the token simply ends; enclosing scopes decide what
/// happens next.
pub struct NoneEndEventBehavior;

#[async_trait]
impl ActivityBehavior for NoneEndEventBehavior {
    async fn execute(&self, ctx: &mut OpContext<'_>, execution: ExecutionId) -> Result<()> {
        ctx.schedule(AtomicOperation::ActivityInstanceEnd, execution);
        Ok(())
    }
}

/// Error end event: throws the declared error code into the scope and
/// process-instance hierarchy.
pub struct ErrorEndEventBehavior;

#[async_trait]
impl ActivityBehavior for ErrorEndEventBehavior {
    async fn execute(&self, ctx: &mut OpContext<'_>, execution: ExecutionId) -> Result<()> {
        let env = ctx.env;
        let def = env.definition_of(ctx.tree, execution)?;
        let activity_id = ctx.tree.get(execution)?.activity.clone().ok_or_else(|| {
            EngineError::Invariant(format!("execution '{}' is not at an activity", execution))
        })?;
        let code = def
            .find_activity(&activity_id)?
            .property(props::ERROR_CODE)
            .ok_or_else(|| DefinitionError::MissingErrorCode(activity_id.clone()))?
            .to_string();
        tracing::info!(
            "error end event '{}' throws error code '{}'",
            activity_id,
            code
        );
        crate::propagation::propagate_error(ctx, execution, Some(code), None)
    }
}

/// Compensation end event: triggers the compensate subscriptions of its
/// scope, waits for every spawned handler to join back, then ends.
pub struct CompensationEndEventBehavior;

#[async_trait]
impl ActivityBehavior for CompensationEndEventBehavior {
    async fn execute(&self, ctx: &mut OpContext<'_>, execution: ExecutionId) -> Result<()> {
        let env = ctx.env;
        let def = env.definition_of(ctx.tree, execution)?;
        let scope = ctx.tree.current_flow_scope(execution, &def)?;
        let scope_execution = ctx.tree.find_execution_for_flow_scope(execution, &scope, &def)?;
        let handlers = ctx
            .tree
            .find_subscriptions(scope_execution, SubscriptionKind::Compensate);

        if handlers.is_empty() {
            ctx.schedule(AtomicOperation::ActivityInstanceEnd, execution);
            return Ok(());
        }

        tracing::info!("compensating {} completed activities", handlers.len());
        ctx.tree.inactivate(execution)?;
        for handler in handlers {
            ctx.tree
                .remove_subscription(scope_execution, SubscriptionKind::Compensate, &handler)?;
            let child = ctx.tree.create_child(execution)?;
            execute_activity(ctx, child, &handler)?;
        }
        Ok(())
    }
}

/// Compensation handler: runs like a task; when it finishes, the engine
/// joins it back into the pending compensation instead of continuing
/// regular control flow.
pub struct CompensationHandlerBehavior;

#[async_trait]
impl ActivityBehavior for CompensationHandlerBehavior {
    async fn execute(&self, ctx: &mut OpContext<'_>, execution: ExecutionId) -> Result<()> {
        let env = ctx.env;
        let def = env.definition_of(ctx.tree, execution)?;
        let activity_id = ctx.tree.get(execution)?.activity.clone().ok_or_else(|| {
            EngineError::Invariant(format!("execution '{}' is not at an activity", execution))
        })?;
        let activity = def.find_activity(&activity_id)?;

        if let Some(name) = activity.property(props::DELEGATE) {
            let delegate = env.delegate(name)?.clone();
            let output = delegate
                .execute(DelegateContext {
                    execution,
                    activity: activity_id.clone(),
                    variables: ctx.tree.visible_variables(execution),
                    properties: activity.properties.clone(),
                })
                .await
                .map_err(EngineError::from)?;
            for (name, value) in output.variables {
                ctx.tree.set_variable(execution, &name, value)?;
            }
        }

        leave_activity(ctx, execution)
    }
}
