use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type ExecutionId = Uuid;
pub type ActivityInstanceId = Uuid;

/// Kinds of event subscriptions held by scope executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionKind {
    Compensate,
    Signal,
}

/// Notifications emitted for every execution-tree mutation and lifecycle
/// step. An external persistence layer observes these; the engine itself
/// performs no I/O.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    ProcessInstanceStarted {
        instance: ExecutionId,
        definition: String,
        timestamp: DateTime<Utc>,
    },
    ProcessInstanceEnded {
        instance: ExecutionId,
        timestamp: DateTime<Utc>,
    },
    ExecutionCreated {
        execution: ExecutionId,
        parent: Option<ExecutionId>,
        instance: ExecutionId,
        timestamp: DateTime<Utc>,
    },
    ExecutionRemoved {
        execution: ExecutionId,
        timestamp: DateTime<Utc>,
    },
    ActivityInstanceStarted {
        execution: ExecutionId,
        activity: String,
        activity_instance: ActivityInstanceId,
        timestamp: DateTime<Utc>,
    },
    ActivityInstanceEnded {
        execution: ExecutionId,
        activity: Option<String>,
        activity_instance: ActivityInstanceId,
        timestamp: DateTime<Utc>,
    },
    VariableUpdated {
        execution: ExecutionId,
        name: String,
        timestamp: DateTime<Utc>,
    },
    EventSubscriptionCreated {
        execution: ExecutionId,
        handler_activity: String,
        kind: SubscriptionKind,
        timestamp: DateTime<Utc>,
    },
    EventSubscriptionRemoved {
        execution: ExecutionId,
        handler_activity: String,
        kind: SubscriptionKind,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus carrying engine events to interested observers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }
}
