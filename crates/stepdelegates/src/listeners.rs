use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use stepcore::{DelegateError, ExecutionListener, ListenerContext, ListenerPhase};

/// One observed listener notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedNotification {
    pub activity: String,
    pub phase: ListenerPhase,
}

/// Records every notification it receives, in order. Useful for asserting
/// listener bracketing in tests.
#[derive(Clone, Default)]
pub struct RecordingListener {
    records: Arc<Mutex<Vec<RecordedNotification>>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<RecordedNotification> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ExecutionListener for RecordingListener {
    async fn notify(&self, ctx: ListenerContext) -> Result<(), DelegateError> {
        if let Ok(mut records) = self.records.lock() {
            records.push(RecordedNotification {
                activity: ctx.activity,
                phase: ctx.phase,
            });
        }
        Ok(())
    }
}

/// Fails every notification. A listener failure aborts the triggering
/// operation chain and goes through error propagation.
pub struct FailingListener {
    message: String,
}

impl FailingListener {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl ExecutionListener for FailingListener {
    async fn notify(&self, _ctx: ListenerContext) -> Result<(), DelegateError> {
        Err(DelegateError::ExecutionFailed(self.message.clone()))
    }
}
