use super::{execute_activity, leave_activity, ActivityBehavior};
use crate::ops::OpContext;
use async_trait::async_trait;
use stepcore::events::ExecutionId;
use stepcore::{props, DefinitionError, EngineError, Result};

/// Embedded subprocess: a composite scope. Entering it spawns a child
/// token on the scope's initial activity; the scope execution waits until
/// its nested work drains, then completes by leaving the scope activity.
pub struct SubProcessBehavior;

#[async_trait]
impl ActivityBehavior for SubProcessBehavior {
    async fn execute(&self, ctx: &mut OpContext<'_>, execution: ExecutionId) -> Result<()> {
        let env = ctx.env;
        let def = env.definition_of(ctx.tree, execution)?;
        let activity_id = ctx.tree.get(execution)?.activity.clone().ok_or_else(|| {
            EngineError::Invariant(format!("execution '{}' is not at an activity", execution))
        })?;
        let activity = def.find_activity(&activity_id)?;
        let initial = activity
            .property(props::INITIAL)
            .ok_or_else(|| DefinitionError::MissingInitial(activity_id.clone()))?
            .to_string();

        ctx.tree.get_mut(execution)?.is_active = false;
        let child = ctx.tree.create_child(execution)?;
        execute_activity(ctx, child, &initial)
    }

    fn complete(&self, ctx: &mut OpContext<'_>, scope_execution: ExecutionId) -> Result<()> {
        leave_activity(ctx, scope_execution)
    }
}
