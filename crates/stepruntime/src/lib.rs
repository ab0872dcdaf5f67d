//! Process execution kernel
//!
//! This crate drives tokens through an immutable process graph: the
//! mutable execution tree, the atomic-operation state machine, the
//! hierarchy walkers, inclusive-gateway synchronization, and structured
//! error/compensation propagation across nested scopes and called
//! process instances.

pub mod behaviors;
mod engine;
mod instance;
mod locks;
mod ops;
pub mod propagation;
mod reachability;
mod tree;
pub mod walker;

pub use engine::{Engine, EngineConfig, ProcessHandle};
pub use instance::{activity_instance_tree, ActivityInstanceNode, TransitionInstanceNode};
pub use locks::{RootLockGuard, RootLocks};
pub use ops::{drain, AtomicOperation, DefinitionEntry, Environment, OpContext, Scheduled};
pub use reachability::ReachabilityIndex;
pub use tree::{EventSubscription, Execution, ExecutionTree, ProcessState};
