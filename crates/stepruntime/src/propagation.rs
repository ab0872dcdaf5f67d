use crate::behaviors::execute_activity;
use crate::ops::{AtomicOperation, Environment, OpContext};
use crate::tree::ExecutionTree;
use crate::walker::{flow_scope_walker, leaf_execution_hierarchy_walker, Collector};
use std::cell::Cell;
use std::rc::Rc;
use stepcore::events::ExecutionId;
use stepcore::{
    BehaviorKind, EngineError, ErrorEventDefinition, ProcessDefinition, Result, ScopeRef, Value,
};

/// Decides how a failure leaves the failing activity: a declared business
/// error (found anywhere in the cause chain) propagates under its code; an
/// engine fault, or any failure outside an active transaction, surfaces
/// unchanged; everything else escalates as an unscoped error.
pub fn propagate_exception(
    ctx: &mut OpContext<'_>,
    execution: ExecutionId,
    failure: EngineError,
) -> Result<()> {
    if let Some(business) = failure.business_error() {
        let code = business.code.clone();
        tracing::debug!(
            "execution '{}' raised business error '{}'",
            execution,
            code
        );
        propagate_error(ctx, execution, Some(code), None)
    } else if failure.is_engine_fault() || !ctx.env.transaction.is_active() {
        Err(failure)
    } else {
        propagate_error(ctx, execution, None, Some(failure))
    }
}

/// Searches the scope hierarchy of the failing process instance and, per
/// call-activity boundary, of every calling instance for a matching error
/// handler. While ascending past a called instance, its calling execution
/// receives the pending output variables before any handler runs.
///
/// Without a handler, a bare code ends the execution with none-end-event
/// semantics; a carried failure is rethrown to the external caller.
pub fn propagate_error(
    ctx: &mut OpContext<'_>,
    execution: ExecutionId,
    code: Option<String>,
    original: Option<EngineError>,
) -> Result<()> {
    let (matched, instances) = {
        let tree: &ExecutionTree = ctx.tree;
        let mut finder = ErrorDeclarationFinder::new(tree, ctx.env, code.as_deref(), original.as_ref());
        let found = finder.found_handle();
        let mut collector = ProcessInstanceCollector::new(tree);
        let mut walker = leaf_execution_hierarchy_walker(tree, execution);
        walker.add_collector(&mut finder);
        walker.add_collector(&mut collector);
        walker.walk_until(move |_| found.get());
        (finder.into_result()?, collector.instances)
    };

    // completing hand-off, once per traversed instance boundary
    for instance in instances.iter().take(instances.len().saturating_sub(1)) {
        let super_execution = ctx.tree.get(*instance)?.super_execution.ok_or_else(|| {
            EngineError::Invariant(format!(
                "called process instance '{}' has no super execution",
                instance
            ))
        })?;
        let behavior = ctx.env.behaviors.get(BehaviorKind::CallActivity)?.clone();
        behavior.completing(ctx, super_execution, *instance)?;
    }

    match matched {
        None => match original {
            None => {
                tracing::info!(
                    "execution '{}' throws an error event with code '{}', but no catching boundary event was defined; ending execution (none end event semantics)",
                    execution,
                    code.as_deref().unwrap_or("<none>")
                );
                ctx.schedule(AtomicOperation::ActivityInstanceEnd, execution);
                Ok(())
            }
            Some(failure) => Err(failure),
        },
        Some(found) => {
            // the called instances below the handling one are abandoned
            for instance in instances.iter().take(instances.len().saturating_sub(1)) {
                ctx.tree.end_instance(*instance)?;
            }
            if let Some(variable) = &found.definition.code_variable {
                let value = code.clone().unwrap_or_default();
                ctx.tree
                    .set_variable(found.handling_execution, variable, Value::String(value))?;
            }
            // the handling scope's current work is interrupted before the
            // handler resumes execution
            let children: Vec<ExecutionId> =
                ctx.tree.children(found.handling_execution).to_vec();
            for child in children {
                ctx.tree.remove(child)?;
            }
            if ctx.tree.get(found.handling_execution)?.activity.is_some() {
                ctx.tree.leave_activity_instance(found.handling_execution)?;
                let e = ctx.tree.get_mut(found.handling_execution)?;
                e.activity = None;
                e.transition = None;
            }
            tracing::info!(
                "error with code '{}' is handled by activity '{}'",
                code.as_deref().unwrap_or("<none>"),
                found.definition.handler_activity
            );
            execute_activity(ctx, found.handling_execution, &found.definition.handler_activity)
        }
    }
}

/// Joins compensating executions: once no non-event-scope child is still
/// compensating, the level detaches and the join moves upward; at the
/// throwing compensation event, ending resumes — exactly once.
pub fn signal_compensation_done(ctx: &mut OpContext<'_>, execution: ExecutionId) -> Result<()> {
    let mut current = execution;
    loop {
        if !ctx.tree.non_event_scope_children(current).is_empty() {
            // siblings still compensating; state stays persisted as is
            return Ok(());
        }
        let env = ctx.env;
        let def = env.definition_of(ctx.tree, current)?;
        let activity = ctx.tree.get(current)?.activity.clone();
        let kind = activity
            .as_deref()
            .map(|a| def.find_activity(a).map(|x| x.behavior))
            .transpose()?;
        if kind == Some(BehaviorKind::CompensationEndEvent) {
            tracing::debug!("compensation done, resuming '{}'", current);
            ctx.tree.activate(current)?;
            ctx.schedule(AtomicOperation::ActivityInstanceEnd, current);
            return Ok(());
        }
        match ctx.tree.get(current)?.parent {
            None => return Ok(()),
            Some(parent) => {
                ctx.tree.remove(current)?;
                current = parent;
            }
        }
    }
}

/// Result of a successful handler search.
pub struct ErrorHandlerMatch {
    pub handling_execution: ExecutionId,
    pub definition: ErrorEventDefinition,
}

/// Per process instance visited by the leaf-execution walk, searches that
/// instance's flow-scope hierarchy for a matching error declaration.
struct ErrorDeclarationFinder<'a> {
    tree: &'a ExecutionTree,
    env: &'a Environment,
    code: Option<&'a str>,
    exception: Option<&'a EngineError>,
    found: Rc<Cell<bool>>,
    result: Option<ErrorHandlerMatch>,
    failure: Option<EngineError>,
}

impl<'a> ErrorDeclarationFinder<'a> {
    fn new(
        tree: &'a ExecutionTree,
        env: &'a Environment,
        code: Option<&'a str>,
        exception: Option<&'a EngineError>,
    ) -> Self {
        Self {
            tree,
            env,
            code,
            exception,
            found: Rc::new(Cell::new(false)),
            result: None,
            failure: None,
        }
    }

    fn found_handle(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.found)
    }

    fn into_result(self) -> Result<Option<ErrorHandlerMatch>> {
        match self.failure {
            Some(failure) => Err(failure),
            None => Ok(self.result),
        }
    }

    fn collect_inner(&mut self, execution: ExecutionId) -> Result<()> {
        let key = self.tree.get(execution)?.definition_key.clone();
        let definition = self.env.definition(&key)?.definition.clone();
        let mapping = self
            .tree
            .create_activity_execution_mapping(execution, &definition)?;
        let start = self.tree.current_flow_scope(execution, &definition)?;

        let mut scope_finder = ScopeErrorFinder::new(&definition, self.code, self.exception);
        let scope_found = scope_finder.found_handle();
        let mut walker = flow_scope_walker(&definition, start);
        walker.add_collector(&mut scope_finder);
        walker.walk_while(move |_| scope_found.get());

        if let Some((scope, declaration)) = scope_finder.result {
            let handling_execution = mapping.get(&scope).copied().ok_or_else(|| {
                EngineError::Invariant(format!("no execution occupies scope {:?}", scope))
            })?;
            self.result = Some(ErrorHandlerMatch {
                handling_execution,
                definition: declaration,
            });
            self.found.set(true);
        }
        Ok(())
    }
}

impl Collector<ExecutionId> for ErrorDeclarationFinder<'_> {
    fn collect(&mut self, execution: &ExecutionId) {
        if self.failure.is_some() {
            return;
        }
        if let Err(failure) = self.collect_inner(*execution) {
            self.failure = Some(failure);
            self.found.set(true);
        }
    }
}

/// Searches one process definition's flow-scope chain for a declaration
/// catching the propagated error, innermost scope first.
struct ScopeErrorFinder<'a> {
    definition: &'a ProcessDefinition,
    code: Option<&'a str>,
    exception: Option<&'a EngineError>,
    found: Rc<Cell<bool>>,
    result: Option<(ScopeRef, ErrorEventDefinition)>,
}

impl<'a> ScopeErrorFinder<'a> {
    fn new(
        definition: &'a ProcessDefinition,
        code: Option<&'a str>,
        exception: Option<&'a EngineError>,
    ) -> Self {
        Self {
            definition,
            code,
            exception,
            found: Rc::new(Cell::new(false)),
            result: None,
        }
    }

    fn found_handle(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.found)
    }
}

impl Collector<ScopeRef> for ScopeErrorFinder<'_> {
    fn collect(&mut self, scope: &ScopeRef) {
        for declaration in self.definition.scope_error_handlers(scope) {
            let matches = match self.exception {
                // resolving from an exception object: match its business
                // code when it carries one, else only catch-alls apply
                Some(exception) => match exception.business_error() {
                    Some(business) => declaration.catches_code(Some(&business.code)),
                    None => declaration.error_code.is_none(),
                },
                None => declaration.catches_code(self.code),
            };
            if matches {
                self.result = Some((scope.clone(), declaration.clone()));
                self.found.set(true);
                break;
            }
        }
    }
}

/// Records the process instance of every execution the leaf-execution
/// walk visits, in visit order (failing instance first).
struct ProcessInstanceCollector<'a> {
    tree: &'a ExecutionTree,
    instances: Vec<ExecutionId>,
}

impl<'a> ProcessInstanceCollector<'a> {
    fn new(tree: &'a ExecutionTree) -> Self {
        Self {
            tree,
            instances: Vec::new(),
        }
    }
}

impl Collector<ExecutionId> for ProcessInstanceCollector<'_> {
    fn collect(&mut self, execution: &ExecutionId) {
        if let Ok(root) = self.tree.process_instance_root(*execution) {
            self.instances.push(root);
        }
    }
}
