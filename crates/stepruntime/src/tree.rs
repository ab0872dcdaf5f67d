use chrono::Utc;
use std::collections::HashMap;
use stepcore::events::{ActivityInstanceId, EngineEvent, EventBus, ExecutionId, SubscriptionKind};
use stepcore::{
    ActivityId, EngineError, ProcessDefinition, Result, ScopeRef, Transition, Value,
};
use uuid::Uuid;

/// A concurrency token positioned in the process graph.
///
/// Executions form a strict tree: a parent exclusively owns its children,
/// the process-instance root is owned by the tree. The `super_execution`
/// back-reference across call-activity boundaries is a plain id, never an
/// owning link.
#[derive(Debug, Clone)]
pub struct Execution {
    pub id: ExecutionId,
    pub parent: Option<ExecutionId>,
    pub children: Vec<ExecutionId>,
    /// Root execution of the process instance this token belongs to.
    pub process_instance: ExecutionId,
    /// Execution in the calling process instance that spawned this
    /// instance via a call activity.
    pub super_execution: Option<ExecutionId>,
    pub definition_key: String,
    pub is_scope: bool,
    pub is_active: bool,
    pub is_event_scope: bool,
    pub activity: Option<ActivityId>,
    pub transition: Option<Transition>,
    /// Transitions selected for leaving the current activity; consumed by
    /// the end-bracket operation when the token moves on or splits.
    pub transitions_to_take: Vec<Transition>,
    pub activity_instance: Option<ActivityInstanceId>,
    pub sequence_counter: u64,
    pub variables: HashMap<String, Value>,
    pub subscriptions: Vec<EventSubscription>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSubscription {
    pub kind: SubscriptionKind,
    pub handler_activity: ActivityId,
}

/// Final state of a process-instance tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessState {
    Active,
    Completed { variables: HashMap<String, Value> },
    Cancelled,
}

/// Mutable runtime model of one process-instance hierarchy: the top-level
/// instance plus every instance started from it through call activities.
/// All executions live in one arena addressed by id, so cross-instance
/// links stay plain ids. Every mutation is announced on the event bus.
pub struct ExecutionTree {
    executions: HashMap<ExecutionId, Execution>,
    events: EventBus,
    top_instance: ExecutionId,
    state: ProcessState,
}

impl ExecutionTree {
    /// Creates the tree for a new top-level process instance. The root
    /// execution is the process-instance root.
    pub fn new_process_instance(
        events: EventBus,
        definition_key: &str,
        variables: HashMap<String, Value>,
    ) -> (Self, ExecutionId) {
        let root = Uuid::new_v4();
        let mut tree = Self {
            executions: HashMap::new(),
            events,
            top_instance: root,
            state: ProcessState::Active,
        };
        tree.insert_root(root, definition_key, None, variables);
        (tree, root)
    }

    /// Starts a called process instance inside this tree, linked to its
    /// calling execution.
    pub fn start_instance(
        &mut self,
        definition_key: &str,
        super_execution: ExecutionId,
        variables: HashMap<String, Value>,
    ) -> ExecutionId {
        let root = Uuid::new_v4();
        self.insert_root(root, definition_key, Some(super_execution), variables);
        root
    }

    fn insert_root(
        &mut self,
        root: ExecutionId,
        definition_key: &str,
        super_execution: Option<ExecutionId>,
        variables: HashMap<String, Value>,
    ) {
        self.executions.insert(
            root,
            Execution {
                id: root,
                parent: None,
                children: Vec::new(),
                process_instance: root,
                super_execution,
                definition_key: definition_key.to_string(),
                is_scope: true,
                is_active: true,
                is_event_scope: false,
                activity: None,
                transition: None,
                transitions_to_take: Vec::new(),
                activity_instance: Some(root),
                sequence_counter: 0,
                variables,
                subscriptions: Vec::new(),
            },
        );
        self.events.emit(EngineEvent::ProcessInstanceStarted {
            instance: root,
            definition: definition_key.to_string(),
            timestamp: Utc::now(),
        });
        self.events.emit(EngineEvent::ExecutionCreated {
            execution: root,
            parent: None,
            instance: root,
            timestamp: Utc::now(),
        });
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn top_instance(&self) -> ExecutionId {
        self.top_instance
    }

    pub fn state(&self) -> &ProcessState {
        &self.state
    }

    pub fn contains(&self, id: ExecutionId) -> bool {
        self.executions.contains_key(&id)
    }

    pub fn executions(&self) -> impl Iterator<Item = &Execution> {
        self.executions.values()
    }

    pub fn get(&self, id: ExecutionId) -> Result<&Execution> {
        self.executions
            .get(&id)
            .ok_or_else(|| EngineError::Invariant(format!("unknown execution '{}'", id)))
    }

    pub fn get_mut(&mut self, id: ExecutionId) -> Result<&mut Execution> {
        self.executions
            .get_mut(&id)
            .ok_or_else(|| EngineError::Invariant(format!("unknown execution '{}'", id)))
    }

    /// Creates a child token under `parent`. The child inherits the
    /// parent's instance, definition and sequence counter.
    pub fn create_child(&mut self, parent: ExecutionId) -> Result<ExecutionId> {
        let id = Uuid::new_v4();
        let parent_exec = self.get_mut(parent)?;
        let child = Execution {
            id,
            parent: Some(parent),
            children: Vec::new(),
            process_instance: parent_exec.process_instance,
            super_execution: None,
            definition_key: parent_exec.definition_key.clone(),
            is_scope: false,
            is_active: true,
            is_event_scope: false,
            activity: None,
            transition: None,
            transitions_to_take: Vec::new(),
            activity_instance: parent_exec.activity_instance,
            sequence_counter: parent_exec.sequence_counter,
            variables: HashMap::new(),
            subscriptions: Vec::new(),
        };
        let instance = parent_exec.process_instance;
        parent_exec.children.push(id);
        self.executions.insert(id, child);
        self.events.emit(EngineEvent::ExecutionCreated {
            execution: id,
            parent: Some(parent),
            instance,
            timestamp: Utc::now(),
        });
        Ok(id)
    }

    /// Detaches an execution from its parent and drops it together with
    /// its subtree. The parent is left to reconsider its own state.
    pub fn remove(&mut self, id: ExecutionId) -> Result<()> {
        let parent = self.get(id)?.parent;
        if let Some(parent) = parent {
            if let Some(parent_exec) = self.executions.get_mut(&parent) {
                parent_exec.children.retain(|c| *c != id);
            }
        }
        self.drop_subtree(id);
        Ok(())
    }

    fn drop_subtree(&mut self, id: ExecutionId) {
        if let Some(execution) = self.executions.remove(&id) {
            for child in execution.children {
                self.drop_subtree(child);
            }
            self.events.emit(EngineEvent::ExecutionRemoved {
                execution: id,
                timestamp: Utc::now(),
            });
        }
    }

    /// Marks a token non-active, e.g. parked at a gateway awaiting its
    /// siblings.
    pub fn inactivate(&mut self, id: ExecutionId) -> Result<()> {
        self.get_mut(id)?.is_active = false;
        Ok(())
    }

    pub fn activate(&mut self, id: ExecutionId) -> Result<()> {
        self.get_mut(id)?.is_active = true;
        Ok(())
    }

    pub fn is_active(&self, id: ExecutionId) -> bool {
        self.executions.get(&id).map(|e| e.is_active).unwrap_or(false)
    }

    /// A token is concurrent iff its parent currently groups two or more
    /// live children. Computed from the tree shape, never stored.
    pub fn is_concurrent(&self, id: ExecutionId) -> bool {
        self.executions
            .get(&id)
            .and_then(|e| e.parent)
            .and_then(|p| self.executions.get(&p))
            .map(|parent| parent.children.len() >= 2)
            .unwrap_or(false)
    }

    pub fn children(&self, id: ExecutionId) -> &[ExecutionId] {
        self.executions
            .get(&id)
            .map(|e| e.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn non_event_scope_children(&self, id: ExecutionId) -> Vec<ExecutionId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|c| self.executions.get(c).map(|e| !e.is_event_scope).unwrap_or(false))
            .collect()
    }

    /// All leaf executions under (and including) the given execution.
    /// A token with children delegates activity occupancy to its leaves.
    pub fn leaf_executions(&self, under: ExecutionId) -> Vec<ExecutionId> {
        let mut leaves = Vec::new();
        self.collect_leaves(under, &mut leaves);
        leaves
    }

    fn collect_leaves(&self, id: ExecutionId, leaves: &mut Vec<ExecutionId>) {
        match self.executions.get(&id) {
            Some(e) if !e.children.is_empty() => {
                for child in &e.children {
                    self.collect_leaves(*child, leaves);
                }
            }
            Some(_) => leaves.push(id),
            None => {}
        }
    }

    /// Sibling tokens parked, by reference, at the given activity. Used to
    /// determine what a join merges.
    pub fn find_inactive_concurrent_executions(
        &self,
        execution: ExecutionId,
        activity: &str,
    ) -> Result<Vec<ExecutionId>> {
        let e = self.get(execution)?;
        if self.is_concurrent(execution) {
            let parent = e
                .parent
                .ok_or_else(|| EngineError::Invariant("concurrent execution without parent".into()))?;
            Ok(self
                .leaf_executions(parent)
                .into_iter()
                .filter(|id| {
                    self.executions
                        .get(id)
                        .map(|x| !x.is_active && x.activity.as_deref() == Some(activity))
                        .unwrap_or(false)
                })
                .collect())
        } else if !e.is_active && e.activity.as_deref() == Some(activity) {
            Ok(vec![execution])
        } else {
            Ok(Vec::new())
        }
    }

    pub fn process_instance_root(&self, id: ExecutionId) -> Result<ExecutionId> {
        Ok(self.get(id)?.process_instance)
    }

    /// The calling execution of the process instance containing `id`, if
    /// any. This is the `next` function of the leaf-execution hierarchy
    /// walker.
    pub fn super_execution_of_instance(&self, id: ExecutionId) -> Option<ExecutionId> {
        let root = self.executions.get(&id)?.process_instance;
        self.executions.get(&root)?.super_execution
    }

    // ---- variables -----------------------------------------------------

    /// Resolves a variable by walking from the execution up through its
    /// parents. Variable state never crosses a process-instance boundary.
    pub fn variable(&self, id: ExecutionId, name: &str) -> Option<&Value> {
        let mut current = Some(id);
        while let Some(cursor) = current {
            let e = self.executions.get(&cursor)?;
            if let Some(value) = e.variables.get(name) {
                return Some(value);
            }
            current = e.parent;
        }
        None
    }

    /// Merged view of every variable visible to the execution, inner
    /// scopes shadowing outer ones.
    pub fn visible_variables(&self, id: ExecutionId) -> HashMap<String, Value> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(cursor) = current {
            match self.executions.get(&cursor) {
                Some(e) => {
                    chain.push(cursor);
                    current = e.parent;
                }
                None => break,
            }
        }
        let mut merged = HashMap::new();
        for cursor in chain.into_iter().rev() {
            if let Some(e) = self.executions.get(&cursor) {
                for (k, v) in &e.variables {
                    merged.insert(k.clone(), v.clone());
                }
            }
        }
        merged
    }

    /// Writes a variable on the nearest enclosing execution already holding
    /// it, falling back to the process-instance root.
    pub fn set_variable(&mut self, id: ExecutionId, name: &str, value: Value) -> Result<()> {
        let mut target = self.get(id)?.process_instance;
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let e = self.get(current)?;
            if e.variables.contains_key(name) {
                target = current;
                break;
            }
            cursor = e.parent;
        }
        self.set_variable_local(target, name, value)
    }

    pub fn set_variable_local(&mut self, id: ExecutionId, name: &str, value: Value) -> Result<()> {
        self.get_mut(id)?.variables.insert(name.to_string(), value);
        self.events.emit(EngineEvent::VariableUpdated {
            execution: id,
            name: name.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    // ---- activity instances --------------------------------------------

    /// Opens a fresh activity instance on the execution and advances its
    /// sequence counter.
    pub fn enter_activity_instance(&mut self, id: ExecutionId) -> Result<ActivityInstanceId> {
        let instance = Uuid::new_v4();
        let e = self.get_mut(id)?;
        e.activity_instance = Some(instance);
        e.sequence_counter += 1;
        let activity = e
            .activity
            .clone()
            .ok_or_else(|| EngineError::Invariant("activity instance without activity".into()))?;
        self.events.emit(EngineEvent::ActivityInstanceStarted {
            execution: id,
            activity,
            activity_instance: instance,
            timestamp: Utc::now(),
        });
        Ok(instance)
    }

    /// Pops the execution back to the enclosing activity instance.
    pub fn leave_activity_instance(&mut self, id: ExecutionId) -> Result<()> {
        let parent_instance = self
            .get(id)?
            .parent
            .and_then(|p| self.executions.get(&p))
            .and_then(|p| p.activity_instance);
        let e = self.get_mut(id)?;
        let old = e.activity_instance.take();
        e.activity_instance = parent_instance;
        if let Some(old) = old {
            let activity = e.activity.clone();
            self.events.emit(EngineEvent::ActivityInstanceEnded {
                execution: id,
                activity,
                activity_instance: old,
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }

    pub fn increment_sequence_counter(&mut self, id: ExecutionId) -> Result<()> {
        self.get_mut(id)?.sequence_counter += 1;
        Ok(())
    }

    // ---- event subscriptions -------------------------------------------

    pub fn create_subscription(
        &mut self,
        scope_execution: ExecutionId,
        kind: SubscriptionKind,
        handler_activity: &str,
    ) -> Result<()> {
        self.get_mut(scope_execution)?.subscriptions.push(EventSubscription {
            kind,
            handler_activity: handler_activity.to_string(),
        });
        self.events.emit(EngineEvent::EventSubscriptionCreated {
            execution: scope_execution,
            handler_activity: handler_activity.to_string(),
            kind,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub fn find_subscriptions(
        &self,
        scope_execution: ExecutionId,
        kind: SubscriptionKind,
    ) -> Vec<ActivityId> {
        self.executions
            .get(&scope_execution)
            .map(|e| {
                e.subscriptions
                    .iter()
                    .filter(|s| s.kind == kind)
                    .map(|s| s.handler_activity.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn remove_subscription(
        &mut self,
        scope_execution: ExecutionId,
        kind: SubscriptionKind,
        handler_activity: &str,
    ) -> Result<()> {
        let e = self.get_mut(scope_execution)?;
        let before = e.subscriptions.len();
        e.subscriptions
            .retain(|s| !(s.kind == kind && s.handler_activity == handler_activity));
        if e.subscriptions.len() != before {
            self.events.emit(EngineEvent::EventSubscriptionRemoved {
                execution: scope_execution,
                handler_activity: handler_activity.to_string(),
                kind,
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }

    // ---- scope/execution mapping ---------------------------------------

    /// Flow scope the execution currently operates in: the destination of
    /// an in-flight transition, or the current activity (itself, if it is a
    /// scope).
    pub fn current_flow_scope(
        &self,
        id: ExecutionId,
        definition: &ProcessDefinition,
    ) -> Result<ScopeRef> {
        let e = self.get(id)?;
        let activity_id = if let Some(transition) = &e.transition {
            transition.destination.clone()
        } else {
            e.activity.clone().ok_or_else(|| {
                EngineError::Invariant(format!(
                    "execution '{}' is neither at an activity nor on a transition",
                    id
                ))
            })?
        };
        let activity = definition.find_activity(&activity_id)?;
        if activity.is_scope {
            Ok(ScopeRef::Activity(activity.id.clone()))
        } else {
            Ok(definition.flow_scope_of(activity))
        }
    }

    /// Nearest scope execution at or above the given execution.
    pub fn nearest_scope_execution(&self, id: ExecutionId) -> Result<ExecutionId> {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let e = self.get(current)?;
            if e.is_scope {
                return Ok(current);
            }
            cursor = e.parent;
        }
        Err(EngineError::Invariant(format!(
            "no scope execution above '{}'",
            id
        )))
    }

    /// Maps each currently occupied scope of one process instance to the
    /// execution occupying it. The execution tree's shape does not mirror
    /// the scope tree one-to-one (concurrent forks add levels that are not
    /// scopes), so the mapping is derived by walking from every leaf
    /// upward. A scope occupied by two different executions is a defect.
    pub fn create_activity_execution_mapping(
        &self,
        instance: ExecutionId,
        definition: &ProcessDefinition,
    ) -> Result<HashMap<ScopeRef, ExecutionId>> {
        let root = self.process_instance_root(instance)?;
        let mut mapping: HashMap<ScopeRef, ExecutionId> = HashMap::new();
        for leaf in self.leaf_executions(root) {
            let e = self.get(leaf)?;
            if e.activity.is_none() && e.transition.is_none() {
                continue;
            }
            let mut scope = self.current_flow_scope(leaf, definition)?;
            let mut occupant = self.nearest_scope_execution(leaf)?;
            loop {
                match mapping.get(&scope) {
                    Some(existing) if *existing != occupant => {
                        return Err(EngineError::Invariant(format!(
                            "scope {:?} is occupied by two executions ('{}' and '{}')",
                            scope, existing, occupant
                        )));
                    }
                    _ => {
                        mapping.insert(scope.clone(), occupant);
                    }
                }
                match definition.scope_flow_scope(&scope) {
                    None => break,
                    Some(parent_scope) => {
                        scope = parent_scope;
                        let above = self.get(occupant)?.parent;
                        occupant = match above {
                            Some(parent) => self.nearest_scope_execution(parent)?,
                            None => occupant,
                        };
                    }
                }
            }
        }
        Ok(mapping)
    }

    /// Resolves the execution occupying the given flow scope, seen from an
    /// execution of the same process instance.
    pub fn find_execution_for_flow_scope(
        &self,
        from: ExecutionId,
        scope: &ScopeRef,
        definition: &ProcessDefinition,
    ) -> Result<ExecutionId> {
        let mapping = self.create_activity_execution_mapping(from, definition)?;
        mapping.get(scope).copied().ok_or_else(|| {
            EngineError::Invariant(format!("no execution occupies scope {:?}", scope))
        })
    }

    /// Executions belonging to one process instance, root first.
    pub fn instance_executions(&self, instance: ExecutionId) -> Vec<ExecutionId> {
        let mut out = Vec::new();
        let mut stack = vec![instance];
        while let Some(id) = stack.pop() {
            if let Some(e) = self.executions.get(&id) {
                out.push(id);
                stack.extend(e.children.iter().copied());
            }
        }
        out
    }

    /// Ends a process instance: captures its root variables, removes its
    /// executions and, for the top-level instance, records the final state.
    pub fn end_instance(&mut self, instance: ExecutionId) -> Result<HashMap<String, Value>> {
        let root = self.process_instance_root(instance)?;
        let variables = self.get(root)?.variables.clone();
        self.remove(root)?;
        self.events.emit(EngineEvent::ProcessInstanceEnded {
            instance: root,
            timestamp: Utc::now(),
        });
        if root == self.top_instance {
            self.state = ProcessState::Completed {
                variables: variables.clone(),
            };
        }
        Ok(variables)
    }

    /// Cancels the whole tree. Cancellation is tree mutation: every
    /// execution is removed and the instance is marked ended.
    pub fn cancel(&mut self) -> Result<()> {
        let roots: Vec<ExecutionId> = self
            .executions
            .values()
            .filter(|e| e.parent.is_none())
            .map(|e| e.id)
            .collect();
        for root in roots {
            self.remove(root)?;
            self.events.emit(EngineEvent::ProcessInstanceEnded {
                instance: root,
                timestamp: Utc::now(),
            });
        }
        self.state = ProcessState::Cancelled;
        Ok(())
    }
}
