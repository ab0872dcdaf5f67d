use crate::behaviors::{self, BehaviorRegistry};
use crate::locks::RootLocks;
use crate::propagation;
use crate::reachability::ReachabilityIndex;
use crate::tree::ExecutionTree;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use stepcore::events::ExecutionId;
use stepcore::{
    ActivityId, BehaviorKind, ConditionEvaluator, DefinitionError, EngineError, ExecutionListener,
    ListenerContext, ListenerPhase, ProcessDefinition, Result, ServiceDelegate, TransactionContext,
};

/// A registered process definition with its precomputed reachability index.
#[derive(Clone)]
pub struct DefinitionEntry {
    pub definition: Arc<ProcessDefinition>,
    pub reachability: Arc<ReachabilityIndex>,
}

/// Immutable collaborator bundle visible to a running operation chain:
/// definitions, behavior dispatch, delegates, listeners, condition
/// evaluation, transaction state and the concurrent-root lock registry.
#[derive(Clone)]
pub struct Environment {
    pub definitions: HashMap<String, DefinitionEntry>,
    pub behaviors: Arc<BehaviorRegistry>,
    pub delegates: HashMap<String, Arc<dyn ServiceDelegate>>,
    pub listeners: HashMap<(String, ActivityId), Vec<(ListenerPhase, Arc<dyn ExecutionListener>)>>,
    pub conditions: Arc<dyn ConditionEvaluator>,
    pub transaction: Arc<dyn TransactionContext>,
    pub locks: Arc<RootLocks>,
}

impl Environment {
    pub fn definition(&self, key: &str) -> Result<&DefinitionEntry> {
        self.definitions
            .get(key)
            .ok_or_else(|| DefinitionError::NotFound(key.to_string()).into())
    }

    pub fn definition_of(
        &self,
        tree: &ExecutionTree,
        execution: ExecutionId,
    ) -> Result<Arc<ProcessDefinition>> {
        let key = tree.get(execution)?.definition_key.clone();
        Ok(self.definition(&key)?.definition.clone())
    }

    pub fn reachability_of(
        &self,
        tree: &ExecutionTree,
        execution: ExecutionId,
    ) -> Result<Arc<ReachabilityIndex>> {
        let key = tree.get(execution)?.definition_key.clone();
        Ok(self.definition(&key)?.reachability.clone())
    }

    pub fn delegate(&self, name: &str) -> Result<&Arc<dyn ServiceDelegate>> {
        self.delegates
            .get(name)
            .ok_or_else(|| EngineError::Execution(format!("unknown delegate '{}'", name)))
    }

    pub fn listeners_for(
        &self,
        definition_key: &str,
        activity: &str,
        phase: ListenerPhase,
    ) -> Vec<Arc<dyn ExecutionListener>> {
        self.listeners
            .get(&(definition_key.to_string(), activity.to_string()))
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(p, _)| *p == phase)
                    .map(|(_, listener)| listener.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// One step of process advancement applied to one execution. Operations
/// are stateless names; everything they need lives on the execution and in
/// the context. Each returns the next operation to run, or none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicOperation {
    /// Move an execution across its current transition.
    TransitionTake,
    /// Enter the destination activity: create a scope execution if the
    /// activity is a scope, open the activity instance, fire start
    /// listeners.
    TransitionCreateScope,
    /// Dispatch the activity's behavior.
    ActivityExecute,
    /// End bracket when leaving an activity along selected transitions:
    /// fire end listeners, then take or split.
    TransitionNotifyListenerEnd,
    /// End bracket when an activity finishes without continuation; ends
    /// the activity instance and lets enclosing scopes complete.
    ActivityInstanceEnd,
    /// End a process instance, handing control back to a calling
    /// execution when one exists.
    ProcessEnd,
}

pub type Scheduled = (AtomicOperation, ExecutionId);

/// Mutable state of one externally-triggered operation chain.
pub struct OpContext<'a> {
    pub tree: &'a mut ExecutionTree,
    pub env: &'a Environment,
    pub queue: VecDeque<Scheduled>,
}

impl<'a> OpContext<'a> {
    pub fn new(tree: &'a mut ExecutionTree, env: &'a Environment) -> Self {
        Self {
            tree,
            env,
            queue: VecDeque::new(),
        }
    }

    pub fn schedule(&mut self, op: AtomicOperation, execution: ExecutionId) {
        self.queue.push_back((op, execution));
    }
}

/// Runs the chain to quiescence. Operations scheduled for executions that
/// were merged away in the meantime are skipped. A failure aborts the
/// chain and surfaces to the external trigger.
pub async fn drain(ctx: &mut OpContext<'_>) -> Result<()> {
    while let Some((op, execution)) = ctx.queue.pop_front() {
        if !ctx.tree.contains(execution) {
            continue;
        }
        tracing::debug!("performing {:?} on execution '{}'", op, execution);
        if let Some(next) = perform(ctx, op, execution).await? {
            ctx.queue.push_front(next);
        }
    }
    Ok(())
}

async fn perform(
    ctx: &mut OpContext<'_>,
    op: AtomicOperation,
    execution: ExecutionId,
) -> Result<Option<Scheduled>> {
    match op {
        AtomicOperation::TransitionTake => op_transition_take(ctx, execution),
        AtomicOperation::TransitionCreateScope => op_transition_create_scope(ctx, execution).await,
        AtomicOperation::ActivityExecute => op_activity_execute(ctx, execution).await,
        AtomicOperation::TransitionNotifyListenerEnd => {
            op_transition_notify_listener_end(ctx, execution).await
        }
        AtomicOperation::ActivityInstanceEnd => op_activity_instance_end(ctx, execution).await,
        AtomicOperation::ProcessEnd => op_process_end(ctx, execution),
    }
}

/// Fires the start/end listeners registered for the execution's current
/// activity. Skipped entirely when the execution holds no activity
/// instance — such a token is purely structural and is not "inside" any
/// logical activity.
pub(crate) async fn notify_listeners(
    ctx: &mut OpContext<'_>,
    execution: ExecutionId,
    phase: ListenerPhase,
) -> Result<()> {
    let (activity, instance, definition_key) = {
        let e = ctx.tree.get(execution)?;
        match (e.activity.clone(), e.activity_instance) {
            (Some(activity), Some(instance)) => (activity, instance, e.definition_key.clone()),
            _ => return Ok(()),
        }
    };
    let listeners = ctx.env.listeners_for(&definition_key, &activity, phase);
    if listeners.is_empty() {
        return Ok(());
    }
    let variables = ctx.tree.visible_variables(execution);
    for listener in listeners {
        listener
            .notify(ListenerContext {
                execution,
                activity: activity.clone(),
                activity_instance: instance,
                phase,
                variables: variables.clone(),
            })
            .await
            .map_err(EngineError::from)?;
    }
    Ok(())
}

/// Pre-step of every end bracket. The execution tree's shape and the
/// logical activity-instance concept diverge at composite-activity
/// boundaries: when a scope execution ends a composite or
/// compensation-throwing scope activity, it takes over the remembered
/// activity instance from its parent and the parent pops one scope level
/// up.
fn event_notifications_started_for_end(ctx: &mut OpContext<'_>, execution: ExecutionId) -> Result<()> {
    ctx.tree.increment_sequence_counter(execution)?;
    let env = ctx.env;
    let def = env.definition_of(ctx.tree, execution)?;
    let (parent, activity_id, is_scope) = {
        let e = ctx.tree.get(execution)?;
        (e.parent, e.activity.clone(), e.is_scope)
    };
    let (Some(parent), Some(activity_id)) = (parent, activity_id) else {
        return Ok(());
    };
    let activity = def.find_activity(&activity_id)?;
    if is_scope
        && activity.is_scope
        && (activity.behavior.is_composite() || activity.behavior.is_compensation_throwing())
    {
        tracing::debug!("execution '{}' leaves scope activity '{}'", execution, activity_id);
        let parent_instance = ctx.tree.get(parent)?.activity_instance;
        ctx.tree.get_mut(execution)?.activity_instance = parent_instance;
        ctx.tree.leave_activity_instance(parent)?;
    }
    Ok(())
}

fn op_transition_take(ctx: &mut OpContext<'_>, execution: ExecutionId) -> Result<Option<Scheduled>> {
    let e = ctx.tree.get(execution)?;
    let transition = e.transition.clone().ok_or_else(|| {
        EngineError::Invariant(format!("execution '{}' has no transition to take", execution))
    })?;
    if let Some(id) = &transition.id {
        tracing::info!("sequence flow with id '{}' was selected as outgoing sequence flow", id);
    }
    tracing::debug!(
        "execution '{}' takes transition to '{}'",
        execution,
        transition.destination
    );
    ctx.tree.increment_sequence_counter(execution)?;
    Ok(Some((AtomicOperation::TransitionCreateScope, execution)))
}

async fn op_transition_create_scope(
    ctx: &mut OpContext<'_>,
    execution: ExecutionId,
) -> Result<Option<Scheduled>> {
    let env = ctx.env;
    let def = env.definition_of(ctx.tree, execution)?;
    let target_id = {
        let e = ctx.tree.get(execution)?;
        e.transition
            .as_ref()
            .map(|t| t.destination.clone())
            .or_else(|| e.activity.clone())
            .ok_or_else(|| {
                EngineError::Invariant(format!("execution '{}' has no destination", execution))
            })?
    };
    let target = def.find_activity(&target_id)?;

    let propagating = if target.is_scope {
        let child = ctx.tree.create_child(execution)?;
        {
            let e = ctx.tree.get_mut(execution)?;
            e.transition = None;
            e.activity = None;
            e.is_active = false;
        }
        ctx.tree.get_mut(child)?.is_scope = true;
        child
    } else {
        execution
    };

    {
        let e = ctx.tree.get_mut(propagating)?;
        e.activity = Some(target_id.clone());
        e.transition = None;
        e.is_active = true;
    }
    ctx.tree.enter_activity_instance(propagating)?;

    if let Err(err) = notify_listeners(ctx, propagating, ListenerPhase::Start).await {
        propagation::propagate_exception(ctx, propagating, err)?;
        return Ok(None);
    }
    Ok(Some((AtomicOperation::ActivityExecute, propagating)))
}

async fn op_activity_execute(
    ctx: &mut OpContext<'_>,
    execution: ExecutionId,
) -> Result<Option<Scheduled>> {
    let env = ctx.env;
    let def = env.definition_of(ctx.tree, execution)?;
    let activity_id = ctx.tree.get(execution)?.activity.clone().ok_or_else(|| {
        EngineError::Invariant(format!("execution '{}' has no activity to execute", execution))
    })?;
    let kind = def.find_activity(&activity_id)?.behavior;

    if ctx.tree.is_concurrent(execution) && !kind.supports_concurrency() {
        return Err(EngineError::UnsupportedConcurrency {
            execution,
            behavior: kind,
        });
    }

    let behavior = env.behaviors.get(kind)?.clone();
    tracing::debug!("executing activity '{}' ({:?})", activity_id, kind);

    let instance_before = ctx.tree.get(execution)?.activity_instance;
    match behavior.execute(ctx, execution).await {
        Ok(()) => Ok(None),
        Err(err) => {
            // propagate only if the execution still occupies the same
            // activity instance; a failure from somewhere else surfaces
            // unchanged
            let same_instance = ctx.tree.contains(execution)
                && ctx.tree.get(execution)?.activity_instance == instance_before;
            if same_instance {
                propagation::propagate_exception(ctx, execution, err)?;
                Ok(None)
            } else {
                Err(err)
            }
        }
    }
}

async fn op_transition_notify_listener_end(
    ctx: &mut OpContext<'_>,
    execution: ExecutionId,
) -> Result<Option<Scheduled>> {
    event_notifications_started_for_end(ctx, execution)?;
    if let Err(err) = notify_listeners(ctx, execution, ListenerPhase::End).await {
        propagation::propagate_exception(ctx, execution, err)?;
        return Ok(None);
    }
    ctx.tree.leave_activity_instance(execution)?;

    let env = ctx.env;
    let def = env.definition_of(ctx.tree, execution)?;
    let mut pending = std::mem::take(&mut ctx.tree.get_mut(execution)?.transitions_to_take);

    // a scope execution leaving its scope activity is destroyed; the
    // transition continues on the level above, dropping scope-local state
    let mut carrier = execution;
    let (is_scope, parent, activity_id) = {
        let e = ctx.tree.get(execution)?;
        (e.is_scope, e.parent, e.activity.clone())
    };
    if let (true, Some(parent), Some(activity_id)) = (is_scope, parent, activity_id) {
        if def.find_activity(&activity_id)?.is_scope {
            ctx.tree.remove(execution)?;
            carrier = if ctx.tree.children(parent).is_empty() {
                ctx.tree.activate(parent)?;
                parent
            } else {
                ctx.tree.create_child(parent)?
            };
        }
    }

    match pending.len() {
        0 => Err(EngineError::Invariant(format!(
            "execution '{}' has no transition selected",
            carrier
        ))),
        1 => {
            let transition = pending.remove(0);
            let e = ctx.tree.get_mut(carrier)?;
            e.activity = None;
            e.transition = Some(transition);
            Ok(Some((AtomicOperation::TransitionTake, carrier)))
        }
        _ => {
            // implicit fork: one concurrent child per selected transition
            {
                let e = ctx.tree.get_mut(carrier)?;
                e.activity = None;
                e.transition = None;
                e.is_active = false;
            }
            for transition in pending {
                let child = ctx.tree.create_child(carrier)?;
                ctx.tree.get_mut(child)?.transition = Some(transition);
                ctx.schedule(AtomicOperation::TransitionTake, child);
            }
            Ok(None)
        }
    }
}

async fn op_activity_instance_end(
    ctx: &mut OpContext<'_>,
    execution: ExecutionId,
) -> Result<Option<Scheduled>> {
    event_notifications_started_for_end(ctx, execution)?;
    if let Err(err) = notify_listeners(ctx, execution, ListenerPhase::End).await {
        propagation::propagate_exception(ctx, execution, err)?;
        return Ok(None);
    }
    ctx.tree.leave_activity_instance(execution)?;

    let env = ctx.env;
    let def = env.definition_of(ctx.tree, execution)?;
    let ended_activity = ctx.tree.get(execution)?.activity.clone();
    {
        let e = ctx.tree.get_mut(execution)?;
        e.activity = None;
        e.transition = None;
    }

    if let Some(ended_id) = &ended_activity {
        // a finished compensation handler joins the compensation instead
        // of continuing regular control flow
        if def.find_activity(ended_id)?.behavior == BehaviorKind::CompensationHandler {
            let parent = ctx.tree.get(execution)?.parent.ok_or_else(|| {
                EngineError::Invariant("compensation handler without parent".into())
            })?;
            ctx.tree.remove(execution)?;
            propagation::signal_compensation_done(ctx, parent)?;
            return Ok(None);
        }
    }

    if ctx.tree.get(execution)?.parent.is_none() {
        return Ok(Some((AtomicOperation::ProcessEnd, execution)));
    }
    collapse_and_continue(ctx, execution)
}

/// Removes a drained token and walks upward: structural levels collapse,
/// a scope execution left without children completes its scope activity,
/// a drained instance root ends the process.
fn collapse_and_continue(
    ctx: &mut OpContext<'_>,
    execution: ExecutionId,
) -> Result<Option<Scheduled>> {
    let env = ctx.env;
    let mut current = execution;
    loop {
        let parent = match ctx.tree.get(current)?.parent {
            Some(parent) => parent,
            None => {
                let e = ctx.tree.get(current)?;
                if e.children.is_empty() && e.activity.is_none() {
                    return Ok(Some((AtomicOperation::ProcessEnd, current)));
                }
                return Ok(None);
            }
        };
        ctx.tree.remove(current)?;
        if !ctx.tree.children(parent).is_empty() {
            // siblings still occupy the level
            return Ok(None);
        }
        let (p_is_scope, p_activity, p_parent) = {
            let p = ctx.tree.get(parent)?;
            (p.is_scope, p.activity.clone(), p.parent)
        };
        if p_is_scope {
            if let Some(scope_activity) = p_activity {
                let def = env.definition_of(ctx.tree, parent)?;
                let kind = def.find_activity(&scope_activity)?.behavior;
                let behavior = env.behaviors.get(kind)?.clone();
                ctx.tree.activate(parent)?;
                behavior.complete(ctx, parent)?;
                return Ok(None);
            }
            if p_parent.is_none() {
                return Ok(Some((AtomicOperation::ProcessEnd, parent)));
            }
        }
        current = parent;
    }
}

fn op_process_end(ctx: &mut OpContext<'_>, execution: ExecutionId) -> Result<Option<Scheduled>> {
    let env = ctx.env;
    let root = ctx.tree.process_instance_root(execution)?;
    let super_execution = ctx.tree.get(root)?.super_execution;
    tracing::info!("process instance '{}' ends", root);
    if let Some(super_execution) = super_execution {
        // the calling execution receives pending output variables before
        // it resumes
        let behavior = env.behaviors.get(BehaviorKind::CallActivity)?.clone();
        behavior.completing(ctx, super_execution, root)?;
        ctx.tree.end_instance(root)?;
        behaviors::leave_activity(ctx, super_execution)?;
    } else {
        ctx.tree.end_instance(root)?;
    }
    Ok(None)
}
