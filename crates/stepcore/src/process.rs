use crate::error::DefinitionError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type ActivityId = String;
pub type TransitionId = String;

/// Well-known activity property keys.
pub mod props {
    /// Transition id of the declared default flow.
    pub const DEFAULT_FLOW: &str = "default";
    /// Name of the service delegate invoked when a task executes.
    pub const DELEGATE: &str = "delegate";
    /// Activity id of the declared compensation handler.
    pub const COMPENSATION_HANDLER: &str = "compensationHandler";
    /// Error code thrown by an error end event.
    pub const ERROR_CODE: &str = "errorCode";
    /// Definition key of the process started by a call activity.
    pub const CALLED_ELEMENT: &str = "calledElement";
    /// Input variable mappings of a call activity (`target=source;...`).
    pub const IN_MAPPINGS: &str = "in";
    /// Output variable mappings of a call activity (`target=source;...`).
    pub const OUT_MAPPINGS: &str = "out";
    /// Entry activity of a scope.
    pub const INITIAL: &str = "initial";
}

/// Closed behavior tag of an activity. Every runtime operation dispatches
/// over this set; there is no open-ended behavior hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BehaviorKind {
    Task,
    ReceiveTask,
    SubProcess,
    InclusiveGateway,
    CallActivity,
    CompensationHandler,
    NoneEndEvent,
    ErrorEndEvent,
    CompensationEndEvent,
}

impl BehaviorKind {
    /// Composite behaviors own nested activities.
    pub fn is_composite(self) -> bool {
        matches!(self, BehaviorKind::SubProcess)
    }

    pub fn is_compensation_throwing(self) -> bool {
        matches!(self, BehaviorKind::CompensationEndEvent)
    }

    /// Behaviors that require their own scope execution and therefore must
    /// be declared as scopes.
    pub fn requires_scope(self) -> bool {
        matches!(self, BehaviorKind::SubProcess | BehaviorKind::CallActivity)
    }

    /// Whether an execution carrying this behavior may sit directly on a
    /// concurrent branch. Scope-requiring behaviors get their own scope
    /// execution instead; hitting them on a concurrent execution is an
    /// invariant breach, not a recoverable state.
    pub fn supports_concurrency(self) -> bool {
        !self.requires_scope()
    }
}

/// Directed edge between two activities with an optional guard expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub id: Option<TransitionId>,
    pub source: ActivityId,
    pub destination: ActivityId,
    pub guard: Option<String>,
}

/// A declared error catch attached to a scope. `error_code = None` catches
/// every propagated error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEventDefinition {
    pub handler_activity: ActivityId,
    pub error_code: Option<String>,
    pub code_variable: Option<String>,
}

impl ErrorEventDefinition {
    pub fn catch_all(handler_activity: impl Into<String>) -> Self {
        Self {
            handler_activity: handler_activity.into(),
            error_code: None,
            code_variable: None,
        }
    }

    pub fn for_code(handler_activity: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            handler_activity: handler_activity.into(),
            error_code: Some(code.into()),
            code_variable: None,
        }
    }

    pub fn with_code_variable(mut self, variable: impl Into<String>) -> Self {
        self.code_variable = Some(variable.into());
        self
    }

    pub fn catches_code(&self, code: Option<&str>) -> bool {
        match (&self.error_code, code) {
            (None, _) => true,
            (Some(declared), Some(code)) => declared == code,
            (Some(_), None) => false,
        }
    }
}

/// Node in the process graph. Immutable once the definition is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub behavior: BehaviorKind,
    pub is_scope: bool,
    /// Enclosing scope activity; `None` places the activity directly under
    /// the process definition root.
    pub flow_scope: Option<ActivityId>,
    pub outgoing: Vec<Transition>,
    pub properties: HashMap<String, String>,
    pub error_handlers: Vec<ErrorEventDefinition>,
}

impl Activity {
    pub fn new(id: impl Into<String>, behavior: BehaviorKind) -> Self {
        Self {
            id: id.into(),
            behavior,
            is_scope: behavior.requires_scope(),
            flow_scope: None,
            outgoing: Vec::new(),
            properties: HashMap::new(),
            error_handlers: Vec::new(),
        }
    }

    pub fn scope(mut self) -> Self {
        self.is_scope = true;
        self
    }

    pub fn in_scope(mut self, scope: impl Into<String>) -> Self {
        self.flow_scope = Some(scope.into());
        self
    }

    pub fn prop(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn catch_error(mut self, definition: ErrorEventDefinition) -> Self {
        self.error_handlers.push(definition);
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn default_flow(&self) -> Option<&str> {
        self.property(props::DEFAULT_FLOW)
    }

    pub fn find_outgoing(&self, transition_id: &str) -> Option<&Transition> {
        self.outgoing
            .iter()
            .find(|t| t.id.as_deref() == Some(transition_id))
    }
}

/// A position in the flow-scope hierarchy: either a scope activity or the
/// process definition root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeRef {
    ProcessRoot,
    Activity(ActivityId),
}

/// Immutable process graph. Produced externally (by a parser/compiler) and
/// consumed read-only by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDefinition {
    pub key: String,
    pub name: Option<String>,
    pub initial: ActivityId,
    pub activities: HashMap<ActivityId, Activity>,
    pub properties: HashMap<String, String>,
    pub error_handlers: Vec<ErrorEventDefinition>,
}

impl ProcessDefinition {
    pub fn builder(key: impl Into<String>) -> ProcessDefinitionBuilder {
        ProcessDefinitionBuilder::new(key)
    }

    pub fn activity(&self, id: &str) -> Option<&Activity> {
        self.activities.get(id)
    }

    pub fn find_activity(&self, id: &str) -> Result<&Activity, DefinitionError> {
        self.activities
            .get(id)
            .ok_or_else(|| DefinitionError::ActivityNotFound(id.to_string()))
    }

    /// Immediate enclosing scope of an activity.
    pub fn flow_scope_of(&self, activity: &Activity) -> ScopeRef {
        match &activity.flow_scope {
            Some(scope) => ScopeRef::Activity(scope.clone()),
            None => ScopeRef::ProcessRoot,
        }
    }

    /// Parent scope of a scope, or `None` at the process root. This is the
    /// `next` function of the flow-scope walker.
    pub fn scope_flow_scope(&self, scope: &ScopeRef) -> Option<ScopeRef> {
        match scope {
            ScopeRef::ProcessRoot => None,
            ScopeRef::Activity(id) => {
                let activity = self.activities.get(id)?;
                Some(self.flow_scope_of(activity))
            }
        }
    }

    pub fn scope_error_handlers(&self, scope: &ScopeRef) -> &[ErrorEventDefinition] {
        match scope {
            ScopeRef::ProcessRoot => &self.error_handlers,
            ScopeRef::Activity(id) => self
                .activities
                .get(id)
                .map(|a| a.error_handlers.as_slice())
                .unwrap_or(&[]),
        }
    }

    pub fn scope_activity_id<'a>(&self, scope: &'a ScopeRef) -> Option<&'a str> {
        match scope {
            ScopeRef::ProcessRoot => None,
            ScopeRef::Activity(id) => Some(id),
        }
    }

    pub fn validate(&self) -> Result<(), DefinitionError> {
        self.find_activity(&self.initial)?;

        for activity in self.activities.values() {
            for transition in &activity.outgoing {
                if !self.activities.contains_key(&transition.destination) {
                    return Err(DefinitionError::DanglingTransition {
                        from: transition.source.clone(),
                        destination: transition.destination.clone(),
                    });
                }
            }

            if let Some(scope) = &activity.flow_scope {
                let scope_activity = self.activities.get(scope).ok_or_else(|| {
                    DefinitionError::DanglingReference {
                        activity: activity.id.clone(),
                        reference: scope.clone(),
                    }
                })?;
                if !scope_activity.is_scope {
                    return Err(DefinitionError::NotAScope {
                        activity: activity.id.clone(),
                        scope: scope.clone(),
                    });
                }
            }

            if activity.behavior.requires_scope() && !activity.is_scope {
                return Err(DefinitionError::NotAScope {
                    activity: activity.id.clone(),
                    scope: activity.id.clone(),
                });
            }

            if activity.behavior == BehaviorKind::SubProcess {
                let initial = activity
                    .property(props::INITIAL)
                    .ok_or_else(|| DefinitionError::MissingInitial(activity.id.clone()))?;
                if !self.activities.contains_key(initial) {
                    return Err(DefinitionError::DanglingReference {
                        activity: activity.id.clone(),
                        reference: initial.to_string(),
                    });
                }
            }

            if activity.behavior == BehaviorKind::ErrorEndEvent
                && activity.property(props::ERROR_CODE).is_none()
            {
                return Err(DefinitionError::MissingErrorCode(activity.id.clone()));
            }

            if let Some(handler) = activity.property(props::COMPENSATION_HANDLER) {
                if !self.activities.contains_key(handler) {
                    return Err(DefinitionError::DanglingReference {
                        activity: activity.id.clone(),
                        reference: handler.to_string(),
                    });
                }
            }

            for declaration in &activity.error_handlers {
                if !self.activities.contains_key(&declaration.handler_activity) {
                    return Err(DefinitionError::DanglingReference {
                        activity: activity.id.clone(),
                        reference: declaration.handler_activity.clone(),
                    });
                }
            }
        }

        for declaration in &self.error_handlers {
            if !self.activities.contains_key(&declaration.handler_activity) {
                return Err(DefinitionError::DanglingReference {
                    activity: self.key.clone(),
                    reference: declaration.handler_activity.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Fluent construction of process definitions, mainly used by parsers and
/// tests. Transitions are appended to the source activity in declaration
/// order, which is also guard-evaluation order. Structural errors are
/// reported by `build`.
pub struct ProcessDefinitionBuilder {
    key: String,
    name: Option<String>,
    initial: Option<ActivityId>,
    activities: Vec<Activity>,
    transitions: Vec<Transition>,
    properties: HashMap<String, String>,
    error_handlers: Vec<ErrorEventDefinition>,
}

impl ProcessDefinitionBuilder {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
            initial: None,
            activities: Vec::new(),
            transitions: Vec::new(),
            properties: HashMap::new(),
            error_handlers: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The first added activity is the initial one unless overridden here.
    pub fn initial(mut self, activity: impl Into<String>) -> Self {
        self.initial = Some(activity.into());
        self
    }

    pub fn prop(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn catch_error(mut self, definition: ErrorEventDefinition) -> Self {
        self.error_handlers.push(definition);
        self
    }

    pub fn activity(mut self, activity: Activity) -> Self {
        if self.initial.is_none() {
            self.initial = Some(activity.id.clone());
        }
        self.activities.push(activity);
        self
    }

    pub fn transition(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.transition_with(from, to, None, None)
    }

    pub fn named_transition(
        self,
        from: impl Into<String>,
        to: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        self.transition_with(from, to, Some(id.into()), None)
    }

    pub fn guarded_transition(
        self,
        from: impl Into<String>,
        to: impl Into<String>,
        id: impl Into<String>,
        guard: impl Into<String>,
    ) -> Self {
        self.transition_with(from, to, Some(id.into()), Some(guard.into()))
    }

    pub fn transition_with(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        id: Option<TransitionId>,
        guard: Option<String>,
    ) -> Self {
        self.transitions.push(Transition {
            id,
            source: from.into(),
            destination: to.into(),
            guard,
        });
        self
    }

    pub fn build(self) -> Result<ProcessDefinition, DefinitionError> {
        let initial = self
            .initial
            .ok_or_else(|| DefinitionError::ActivityNotFound("<initial>".to_string()))?;
        let mut activities: HashMap<ActivityId, Activity> = HashMap::new();
        for activity in self.activities {
            if activities.contains_key(&activity.id) {
                return Err(DefinitionError::DuplicateActivity(activity.id));
            }
            activities.insert(activity.id.clone(), activity);
        }
        for transition in self.transitions {
            let source = activities
                .get_mut(&transition.source)
                .ok_or_else(|| DefinitionError::ActivityNotFound(transition.source.clone()))?;
            source.outgoing.push(transition);
        }
        let definition = ProcessDefinition {
            key: self.key,
            name: self.name,
            initial,
            activities,
            properties: self.properties,
            error_handlers: self.error_handlers,
        };
        definition.validate()?;
        Ok(definition)
    }
}
