//! Core abstractions for the process execution kernel
//!
//! This crate provides the immutable process graph model, the variable
//! value type, the error taxonomy, the engine event bus, and the traits
//! behind which external collaborators (delegates, listeners, condition
//! evaluation, transactions) plug in. It has no runtime machinery.

mod condition;
mod delegate;
mod error;
pub mod events;
mod process;
mod value;

pub use condition::{ConditionEvaluator, JmespathConditionEvaluator};
pub use delegate::{
    AlwaysActive, DelegateContext, DelegateOutput, ExecutionListener, ListenerContext,
    ListenerPhase, ServiceDelegate, TransactionContext,
};
pub use error::{BusinessError, DefinitionError, DelegateError, EngineError};
pub use events::{ActivityInstanceId, EngineEvent, EventBus, ExecutionId, SubscriptionKind};
pub use process::{
    props, Activity, ActivityId, BehaviorKind, ErrorEventDefinition, ProcessDefinition,
    ProcessDefinitionBuilder, ScopeRef, Transition, TransitionId,
};
pub use value::Value;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
