mod common;

use async_trait::async_trait;
use common::{drain_events, init_tracing, vars};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use stepcore::events::EngineEvent;
use stepcore::{
    props, Activity, BehaviorKind, DelegateContext, DelegateError, DelegateOutput,
    ExecutionListener, ListenerContext, ListenerPhase, ProcessDefinition, ServiceDelegate, Value,
};
use stepruntime::{Engine, ProcessState};

struct SetVar {
    name: String,
    value: Value,
}

#[async_trait]
impl ServiceDelegate for SetVar {
    async fn execute(&self, _ctx: DelegateContext) -> Result<DelegateOutput, DelegateError> {
        Ok(DelegateOutput::new().with_variable(self.name.clone(), self.value.clone()))
    }
}

#[derive(Clone, Default)]
struct Recorder {
    seen: Arc<Mutex<Vec<(String, ListenerPhase)>>>,
}

#[async_trait]
impl ExecutionListener for Recorder {
    async fn notify(&self, ctx: ListenerContext) -> Result<(), DelegateError> {
        self.seen.lock().unwrap().push((ctx.activity, ctx.phase));
        Ok(())
    }
}

fn sequential_definition() -> ProcessDefinition {
    ProcessDefinition::builder("hello")
        .activity(Activity::new("greet", BehaviorKind::Task).prop(props::DELEGATE, "greeter"))
        .activity(Activity::new("done", BehaviorKind::NoneEndEvent))
        .transition("greet", "done")
        .build()
        .unwrap()
}

#[tokio::test]
async fn sequential_process_runs_to_completion() {
    init_tracing();
    let engine = Engine::new();
    engine.register_definition(sequential_definition()).await.unwrap();
    engine
        .register_delegate(
            "greeter",
            Arc::new(SetVar {
                name: "greeting".to_string(),
                value: Value::String("hello".to_string()),
            }),
        )
        .await;

    let handle = engine.start_process("hello", vars(&[])).await.unwrap();
    match handle.state {
        ProcessState::Completed { variables } => {
            assert_eq!(
                variables.get("greeting"),
                Some(&Value::String("hello".to_string()))
            );
        }
        other => panic!("expected completion, got {:?}", other),
    }
}

#[tokio::test]
async fn listeners_bracket_the_activity_instance() {
    init_tracing();
    let engine = Engine::new();
    engine.register_definition(sequential_definition()).await.unwrap();
    engine
        .register_delegate(
            "greeter",
            Arc::new(SetVar {
                name: "greeting".to_string(),
                value: Value::String("hi".to_string()),
            }),
        )
        .await;

    let recorder = Recorder::default();
    engine
        .register_listener("hello", "greet", ListenerPhase::Start, Arc::new(recorder.clone()))
        .await;
    engine
        .register_listener("hello", "greet", ListenerPhase::End, Arc::new(recorder.clone()))
        .await;

    engine.start_process("hello", vars(&[])).await.unwrap();

    let seen = recorder.seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            ("greet".to_string(), ListenerPhase::Start),
            ("greet".to_string(), ListenerPhase::End),
        ]
    );
}

#[tokio::test]
async fn lifecycle_is_observable_on_the_event_bus() {
    init_tracing();
    let engine = Engine::new();
    engine.register_definition(sequential_definition()).await.unwrap();
    engine
        .register_delegate(
            "greeter",
            Arc::new(SetVar {
                name: "greeting".to_string(),
                value: Value::Bool(true),
            }),
        )
        .await;

    let mut rx = engine.subscribe_events();
    let handle = engine.start_process("hello", vars(&[])).await.unwrap();
    let events = drain_events(&mut rx);

    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::ProcessInstanceStarted { instance, .. } if *instance == handle.instance)));
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::ActivityInstanceStarted { activity, .. } if activity == "greet")));
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::ActivityInstanceEnded { activity: Some(a), .. } if a == "greet")));
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::VariableUpdated { name, .. } if name == "greeting")));
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::ProcessInstanceEnded { instance, .. } if *instance == handle.instance)));
}

#[tokio::test]
async fn receive_task_parks_until_signalled() {
    init_tracing();
    let engine = Engine::new();
    let definition = ProcessDefinition::builder("waiting")
        .activity(Activity::new("wait", BehaviorKind::ReceiveTask))
        .activity(Activity::new("done", BehaviorKind::NoneEndEvent))
        .transition("wait", "done")
        .build()
        .unwrap();
    engine.register_definition(definition).await.unwrap();

    let handle = engine.start_process("waiting", vars(&[])).await.unwrap();
    assert_eq!(handle.state, ProcessState::Active);

    let parked = engine.executions_at(handle.instance, "wait").await.unwrap();
    assert_eq!(parked.len(), 1);

    let state = engine
        .signal(
            handle.instance,
            parked[0],
            vars(&[("payload", Value::Number(9.0))]),
        )
        .await
        .unwrap();
    match state {
        ProcessState::Completed { variables } => {
            assert_eq!(variables.get("payload"), Some(&Value::Number(9.0)));
        }
        other => panic!("expected completion, got {:?}", other),
    }
}

#[tokio::test]
async fn implicit_fork_spawns_concurrent_tokens() {
    init_tracing();
    let engine = Engine::new();
    let definition = ProcessDefinition::builder("forked")
        .activity(Activity::new("fork", BehaviorKind::Task))
        .activity(Activity::new("left", BehaviorKind::ReceiveTask))
        .activity(Activity::new("right", BehaviorKind::ReceiveTask))
        .transition("fork", "left")
        .transition("fork", "right")
        .build()
        .unwrap();
    engine.register_definition(definition).await.unwrap();

    let handle = engine.start_process("forked", vars(&[])).await.unwrap();
    assert_eq!(handle.state, ProcessState::Active);
    assert_eq!(engine.executions_at(handle.instance, "left").await.unwrap().len(), 1);
    assert_eq!(engine.executions_at(handle.instance, "right").await.unwrap().len(), 1);
}

#[tokio::test]
async fn cancellation_is_tree_mutation() {
    init_tracing();
    let engine = Engine::new();
    let definition = ProcessDefinition::builder("cancellable")
        .activity(Activity::new("wait", BehaviorKind::ReceiveTask))
        .build()
        .unwrap();
    engine.register_definition(definition).await.unwrap();

    let handle = engine.start_process("cancellable", vars(&[])).await.unwrap();
    assert_eq!(handle.state, ProcessState::Active);

    engine.cancel_process(handle.instance).await.unwrap();
    assert_eq!(
        engine.process_state(handle.instance).await.unwrap(),
        ProcessState::Cancelled
    );
    assert!(engine
        .executions_at(handle.instance, "wait")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn subprocess_scopes_variables_and_completes() {
    init_tracing();
    let engine = Engine::new();
    let definition = ProcessDefinition::builder("scoped")
        .activity(Activity::new("sub", BehaviorKind::SubProcess).prop(props::INITIAL, "inner"))
        .activity(
            Activity::new("inner", BehaviorKind::Task)
                .in_scope("sub")
                .prop(props::DELEGATE, "marker"),
        )
        .activity(Activity::new("after", BehaviorKind::Task).prop(props::DELEGATE, "marker2"))
        .activity(Activity::new("done", BehaviorKind::NoneEndEvent))
        .transition("sub", "after")
        .transition("after", "done")
        .build()
        .unwrap();
    engine.register_definition(definition).await.unwrap();
    engine
        .register_delegate(
            "marker",
            Arc::new(SetVar {
                name: "inside".to_string(),
                value: Value::Bool(true),
            }),
        )
        .await;
    engine
        .register_delegate(
            "marker2",
            Arc::new(SetVar {
                name: "outside".to_string(),
                value: Value::Bool(true),
            }),
        )
        .await;

    let handle = engine.start_process("scoped", HashMap::new()).await.unwrap();
    match handle.state {
        ProcessState::Completed { variables } => {
            assert_eq!(variables.get("inside"), Some(&Value::Bool(true)));
            assert_eq!(variables.get("outside"), Some(&Value::Bool(true)));
        }
        other => panic!("expected completion, got {:?}", other),
    }
}
