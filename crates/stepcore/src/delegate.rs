use crate::error::DelegateError;
use crate::events::{ActivityInstanceId, ExecutionId};
use crate::process::ActivityId;
use crate::Value;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// User code invoked when a task activity executes. Delegates receive a
/// snapshot of the execution's visible variables and hand back variable
/// updates; they never touch the execution tree directly.
#[async_trait]
pub trait ServiceDelegate: Send + Sync {
    async fn execute(&self, ctx: DelegateContext) -> Result<DelegateOutput, DelegateError>;
}

/// Execution snapshot passed to a service delegate.
#[derive(Debug, Clone)]
pub struct DelegateContext {
    pub execution: ExecutionId,
    pub activity: ActivityId,
    pub variables: HashMap<String, Value>,
    pub properties: HashMap<String, String>,
}

impl DelegateContext {
    pub fn require_variable(&self, name: &str) -> Result<&Value, DelegateError> {
        self.variables
            .get(name)
            .ok_or_else(|| DelegateError::MissingVariable(name.to_string()))
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }
}

/// Variable updates produced by a delegate, applied by the engine after the
/// delegate returns.
#[derive(Debug, Clone, Default)]
pub struct DelegateOutput {
    pub variables: HashMap<String, Value>,
}

impl DelegateOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListenerPhase {
    Start,
    End,
}

/// Listener notified when an activity instance starts or ends. A listener
/// failure aborts the triggering operation chain and is handed to error
/// propagation.
#[async_trait]
pub trait ExecutionListener: Send + Sync {
    async fn notify(&self, ctx: ListenerContext) -> Result<(), DelegateError>;
}

#[derive(Debug, Clone)]
pub struct ListenerContext {
    pub execution: ExecutionId,
    pub activity: ActivityId,
    pub activity_instance: ActivityInstanceId,
    pub phase: ListenerPhase,
    pub variables: HashMap<String, Value>,
}

/// Transaction-state seam of the excluded command/transaction collaborator.
/// Error propagation consults it before absorbing an undeclared failure.
pub trait TransactionContext: Send + Sync {
    fn is_active(&self) -> bool;
}

/// Default transaction context: a surrounding transaction is assumed live.
pub struct AlwaysActive;

impl TransactionContext for AlwaysActive {
    fn is_active(&self) -> bool {
        true
    }
}
