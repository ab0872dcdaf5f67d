use crate::events::ExecutionId;
use crate::process::BehaviorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("business error: {0}")]
    Business(#[from] BusinessError),

    #[error("definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("delegate error: {0}")]
    Delegate(#[from] DelegateError),

    #[error("condition error: {0}")]
    Condition(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("execution '{execution}' with behavior '{behavior:?}' cannot have concurrency")]
    UnsupportedConcurrency {
        execution: ExecutionId,
        behavior: BehaviorKind,
    },

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Searches the error and its cause chain for a declared business error.
    pub fn business_error(&self) -> Option<&BusinessError> {
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(business) = err.downcast_ref::<BusinessError>() {
                return Some(business);
            }
            current = err.source();
        }
        None
    }

    /// An engine-originated fault with nothing to unwrap: definition
    /// defects, invariant breaches and the like. These are never handed to
    /// process-level error handlers; they surface to the external caller.
    pub fn is_engine_fault(&self) -> bool {
        matches!(
            self,
            EngineError::Definition(_)
                | EngineError::Condition(_)
                | EngineError::Execution(_)
                | EngineError::UnsupportedConcurrency { .. }
                | EngineError::Invariant(_)
        )
    }
}

/// A declared, structured process error. Delegates raise it (directly or
/// nested in a cause chain) to request propagation to a boundary handler
/// matching the code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("error code '{code}'")]
pub struct BusinessError {
    pub code: String,
    pub message: Option<String>,
}

impl BusinessError {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: None,
        }
    }

    pub fn with_message(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: Some(message.into()),
        }
    }
}

/// Defects in the process graph itself. Fatal and never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("process definition not found: {0}")]
    NotFound(String),

    #[error("activity not found: {0}")]
    ActivityNotFound(String),

    #[error("duplicate activity id: {0}")]
    DuplicateActivity(String),

    #[error("transition from '{from}' references unknown activity '{destination}'")]
    DanglingTransition { from: String, destination: String },

    #[error("flow scope '{scope}' of activity '{activity}' is not a scope")]
    NotAScope { activity: String, scope: String },

    #[error("activity '{activity}' references unknown activity '{reference}'")]
    DanglingReference { activity: String, reference: String },

    #[error("scope activity '{0}' declares no initial activity")]
    MissingInitial(String),

    #[error("activity '{0}' declares no error code to throw")]
    MissingErrorCode(String),

    #[error("default sequence flow '{transition}' for element '{activity}' could not be found")]
    MissingDefaultFlow { activity: String, transition: String },

    #[error("no outgoing sequence flow for element '{0}' could be selected for continuing the process")]
    StuckExecution(String),
}

/// Failures raised by service delegates and execution listeners.
#[derive(Error, Debug)]
pub enum DelegateError {
    #[error("missing variable: {0}")]
    MissingVariable(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error(transparent)]
    Business(#[from] BusinessError),

    #[error("{message}")]
    Other {
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
