//! Stock service delegates and execution listeners
//!
//! Small, reusable collaborator implementations for embedders and tests:
//! variable setters, logging, declared-error throwing, and a recording
//! listener for asserting listener order.

mod delegates;
mod listeners;

pub use delegates::{LogDelegate, SetVariablesDelegate, ThrowErrorDelegate};
pub use listeners::{FailingListener, RecordedNotification, RecordingListener};
