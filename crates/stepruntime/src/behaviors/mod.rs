mod call_activity;
mod event;
mod gateway;
mod subprocess;
mod task;

pub use call_activity::CallActivityBehavior;
pub use event::{
    CompensationEndEventBehavior, CompensationHandlerBehavior, ErrorEndEventBehavior,
    NoneEndEventBehavior,
};
pub use gateway::InclusiveGatewayBehavior;
pub use subprocess::SubProcessBehavior;
pub use task::{ReceiveTaskBehavior, TaskBehavior};

use crate::ops::{AtomicOperation, OpContext};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use stepcore::events::{ExecutionId, SubscriptionKind};
use stepcore::{
    props, Activity, BehaviorKind, DefinitionError, EngineError, Result, Transition, Value,
};

/// Runtime behavior of one `BehaviorKind`. The set of kinds is closed;
/// behaviors schedule follow-up atomic operations through the chain
/// context instead of recursing into each other.
#[async_trait]
pub trait ActivityBehavior: Send + Sync {
    /// The execution arrived at the activity.
    async fn execute(&self, ctx: &mut OpContext<'_>, execution: ExecutionId) -> Result<()>;

    /// An external trigger resumes a waiting execution.
    async fn signal(
        &self,
        ctx: &mut OpContext<'_>,
        execution: ExecutionId,
        _signal: &str,
        _payload: Option<Value>,
    ) -> Result<()> {
        let activity = ctx
            .tree
            .get(execution)?
            .activity
            .clone()
            .unwrap_or_default();
        Err(EngineError::Execution(format!(
            "the activity with id '{}' doesn't accept signals",
            activity
        )))
    }

    /// All nested work of a composite scope finished.
    fn complete(&self, ctx: &mut OpContext<'_>, scope_execution: ExecutionId) -> Result<()> {
        let activity = ctx
            .tree
            .get(scope_execution)?
            .activity
            .clone()
            .unwrap_or_default();
        Err(EngineError::Invariant(format!(
            "activity '{}' cannot complete nested executions",
            activity
        )))
    }

    /// A called process instance is about to end or be abandoned; pending
    /// output variables move onto the calling execution.
    fn completing(
        &self,
        _ctx: &mut OpContext<'_>,
        super_execution: ExecutionId,
        _sub_instance: ExecutionId,
    ) -> Result<()> {
        Err(EngineError::Invariant(format!(
            "execution '{}' is not executing a call activity",
            super_execution
        )))
    }
}

/// Dispatch table from behavior kind to implementation. The standard table
/// covers every kind; embedders may override single entries.
pub struct BehaviorRegistry {
    table: HashMap<BehaviorKind, Arc<dyn ActivityBehavior>>,
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(BehaviorKind::Task, Arc::new(TaskBehavior));
        registry.register(BehaviorKind::ReceiveTask, Arc::new(ReceiveTaskBehavior));
        registry.register(BehaviorKind::SubProcess, Arc::new(SubProcessBehavior));
        registry.register(BehaviorKind::InclusiveGateway, Arc::new(InclusiveGatewayBehavior));
        registry.register(BehaviorKind::CallActivity, Arc::new(CallActivityBehavior));
        registry.register(
            BehaviorKind::CompensationHandler,
            Arc::new(CompensationHandlerBehavior),
        );
        registry.register(BehaviorKind::NoneEndEvent, Arc::new(NoneEndEventBehavior));
        registry.register(BehaviorKind::ErrorEndEvent, Arc::new(ErrorEndEventBehavior));
        registry.register(
            BehaviorKind::CompensationEndEvent,
            Arc::new(CompensationEndEventBehavior),
        );
        registry
    }

    pub fn register(&mut self, kind: BehaviorKind, behavior: Arc<dyn ActivityBehavior>) {
        self.table.insert(kind, behavior);
    }

    pub fn get(&self, kind: BehaviorKind) -> Result<&Arc<dyn ActivityBehavior>> {
        self.table.get(&kind).ok_or_else(|| {
            EngineError::Invariant(format!("no behavior registered for {:?}", kind))
        })
    }
}

impl Default for BehaviorRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Evaluates the activity's outgoing transitions: every non-default
/// transition whose guard passes (or that has no guard) is selected, in
/// declaration order. With none selected the declared default flow is
/// taken; a missing or undeclared default is fatal.
pub fn select_outgoing_transitions(
    ctx: &OpContext<'_>,
    execution: ExecutionId,
    activity: &Activity,
) -> Result<Vec<Transition>> {
    let default_flow = activity.default_flow();
    let variables = ctx.tree.visible_variables(execution);
    let mut selected = Vec::new();

    for transition in &activity.outgoing {
        if let Some(default_id) = default_flow {
            if transition.id.as_deref() == Some(default_id) {
                continue;
            }
        }
        match &transition.guard {
            None => selected.push(transition.clone()),
            Some(guard) => {
                if ctx.env.conditions.evaluate(guard, &variables)? {
                    selected.push(transition.clone());
                }
            }
        }
    }

    if selected.is_empty() {
        match default_flow {
            Some(default_id) => {
                let transition = activity.find_outgoing(default_id).ok_or_else(|| {
                    DefinitionError::MissingDefaultFlow {
                        activity: activity.id.clone(),
                        transition: default_id.to_string(),
                    }
                })?;
                selected.push(transition.clone());
            }
            None => return Err(DefinitionError::StuckExecution(activity.id.clone()).into()),
        }
    }
    Ok(selected)
}

/// Leaves the current activity: creates a compensate subscription when the
/// activity declares a handler, then selects and takes the outgoing
/// transitions. Without any outgoing transition the execution simply ends.
pub fn leave_activity(ctx: &mut OpContext<'_>, execution: ExecutionId) -> Result<()> {
    let env = ctx.env;
    let def = env.definition_of(ctx.tree, execution)?;
    let activity_id = ctx.tree.get(execution)?.activity.clone().ok_or_else(|| {
        EngineError::Invariant(format!("execution '{}' is not at an activity", execution))
    })?;
    let activity = def.find_activity(&activity_id)?;

    if let Some(handler_id) = activity.property(props::COMPENSATION_HANDLER) {
        let handler = def.find_activity(handler_id)?;
        // a compensation event subprocess subscribes on its own when its
        // scope is entered
        let handler_is_event_subprocess =
            handler.behavior == BehaviorKind::CompensationHandler && handler.is_scope;
        if !handler_is_event_subprocess {
            let scope = def.flow_scope_of(activity);
            let scope_execution = ctx.tree.find_execution_for_flow_scope(execution, &scope, &def)?;
            ctx.tree
                .create_subscription(scope_execution, SubscriptionKind::Compensate, handler_id)?;
        }
    }

    if activity.outgoing.is_empty() {
        tracing::info!(
            "no outgoing sequence flow found for activity '{}', ending execution",
            activity_id
        );
        ctx.schedule(AtomicOperation::ActivityInstanceEnd, execution);
        return Ok(());
    }

    tracing::info!("leaving activity '{}'", activity_id);
    let transitions = select_outgoing_transitions(ctx, execution, activity)?;
    leave_via_transitions(ctx, execution, transitions, Vec::new())
}

/// Takes the given transitions out of the current activity, merging the
/// previously parked `joined` tokens into the leaving execution.
pub fn leave_via_transitions(
    ctx: &mut OpContext<'_>,
    execution: ExecutionId,
    transitions: Vec<Transition>,
    joined: Vec<ExecutionId>,
) -> Result<()> {
    for other in joined {
        if other != execution {
            ctx.tree.remove(other)?;
        }
    }
    ctx.tree.activate(execution)?;
    ctx.tree.get_mut(execution)?.transitions_to_take = transitions;
    ctx.schedule(AtomicOperation::TransitionNotifyListenerEnd, execution);
    Ok(())
}

/// Points the execution at an activity and schedules its entry. Used when
/// control moves without a transition: scope entries, error-handler
/// resumption, compensation.
pub fn execute_activity(
    ctx: &mut OpContext<'_>,
    execution: ExecutionId,
    activity: &str,
) -> Result<()> {
    {
        let e = ctx.tree.get_mut(execution)?;
        e.activity = Some(activity.to_string());
        e.transition = None;
        e.is_active = true;
    }
    ctx.schedule(AtomicOperation::TransitionCreateScope, execution);
    Ok(())
}
