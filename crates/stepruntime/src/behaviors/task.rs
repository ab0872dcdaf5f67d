use super::{leave_activity, ActivityBehavior};
use crate::ops::OpContext;
use async_trait::async_trait;
use stepcore::events::ExecutionId;
use stepcore::{props, DelegateContext, EngineError, Result, Value};

/// Plain task: invokes the configured service delegate (if any), applies
/// its variable updates and leaves.
pub struct TaskBehavior;

#[async_trait]
impl ActivityBehavior for TaskBehavior {
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

/// Wait state: the token stays active at the activity until an external
/// signal arrives. Suspension is persisted tree state, not an in-memory
/// computation.
pub struct ReceiveTaskBehavior;

#[async_trait]
impl ActivityBehavior for ReceiveTaskBehavior {
    async fn execute(&self, _ctx: &mut OpContext<'_>, _execution: ExecutionId) -> Result<()> {
        Ok(())
    }

    async fn signal(
        &self,
        ctx: &mut OpContext<'_>,
        execution: ExecutionId,
        _signal: &str,
        _payload: Option<Value>,
    ) -> Result<()> {
        leave_activity(ctx, execution)
    }
}
