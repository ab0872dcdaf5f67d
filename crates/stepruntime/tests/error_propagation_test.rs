mod common;

use async_trait::async_trait;
use common::{drain_events, init_tracing, vars};
use std::sync::Arc;
use stepcore::events::EngineEvent;
use stepcore::{
    props, Activity, BehaviorKind, BusinessError, DelegateContext, DelegateError, DelegateOutput,
    EngineError, ErrorEventDefinition, ProcessDefinition, ServiceDelegate, Value,
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

struct ThrowBusiness {
    code: String,
}

#[async_trait]
impl ServiceDelegate for ThrowBusiness {
    async fn execute(&self, _ctx: DelegateContext) -> Result<DelegateOutput, DelegateError> {
        Err(DelegateError::Business(BusinessError::new(self.code.clone())))
    }
}

struct Fail;

#[async_trait]
impl ServiceDelegate for Fail {
    async fn execute(&self, _ctx: DelegateContext) -> Result<DelegateOutput, DelegateError> {
        Err(DelegateError::ExecutionFailed("downstream unavailable".to_string()))
    }
}

#[tokio::test]
async fn error_thrown_in_a_subprocess_resumes_at_the_scope_handler() {
    init_tracing();
    let engine = Engine::new();
    let definition = ProcessDefinition::builder("order")
        .activity(
            Activity::new("sub", BehaviorKind::SubProcess)
                .prop(props::INITIAL, "work")
                .catch_error(
                    ErrorEventDefinition::for_code("handle", "E42").with_code_variable("errCode"),
                ),
        )
        .activity(Activity::new("work", BehaviorKind::Task).in_scope("sub"))
        .activity(
            Activity::new("fail", BehaviorKind::ErrorEndEvent)
                .in_scope("sub")
                .prop(props::ERROR_CODE, "E42"),
        )
        .activity(Activity::new("handle", BehaviorKind::Task).prop(props::DELEGATE, "mark"))
        .transition("work", "fail")
        .build()
        .unwrap();
    engine.register_definition(definition).await.unwrap();
    engine
        .register_delegate(
            "mark",
            Arc::new(SetVar {
                name: "handled".to_string(),
                value: Value::Bool(true),
            }),
        )
        .await;

    let handle = engine.start_process("order", vars(&[])).await.unwrap();
    match handle.state {
        ProcessState::Completed { variables } => {
            assert_eq!(variables.get("handled"), Some(&Value::Bool(true)));
            assert_eq!(
                variables.get("errCode"),
                Some(&Value::String("E42".to_string()))
            );
        }
        other => panic!("expected completion, got {:?}", other),
    }
}

#[tokio::test]
async fn unmatched_code_without_failure_ends_quietly() {
    init_tracing();
    let engine = Engine::new();
    let definition = ProcessDefinition::builder("quiet")
        .activity(Activity::new("boom", BehaviorKind::ErrorEndEvent).prop(props::ERROR_CODE, "NOBODY"))
        .build()
        .unwrap();
    engine.register_definition(definition).await.unwrap();

    // none-end-event semantics: nothing surfaces to the caller
    let handle = engine.start_process("quiet", vars(&[])).await.unwrap();
    assert!(matches!(handle.state, ProcessState::Completed { .. }));
}

#[tokio::test]
async fn business_error_from_a_delegate_is_caught_by_code() {
    init_tracing();
    let engine = Engine::new();
    let definition = ProcessDefinition::builder("biz")
        .catch_error(ErrorEventDefinition::for_code("recover", "CREDIT").with_code_variable("code"))
        .activity(Activity::new("charge", BehaviorKind::Task).prop(props::DELEGATE, "charger"))
        .activity(Activity::new("done", BehaviorKind::NoneEndEvent))
        .activity(Activity::new("recover", BehaviorKind::Task).prop(props::DELEGATE, "mark"))
        .transition("charge", "done")
        .build()
        .unwrap();
    engine.register_definition(definition).await.unwrap();
    engine
        .register_delegate("charger", Arc::new(ThrowBusiness { code: "CREDIT".to_string() }))
        .await;
    engine
        .register_delegate(
            "mark",
            Arc::new(SetVar {
                name: "recovered".to_string(),
                value: Value::Bool(true),
            }),
        )
        .await;

    let handle = engine.start_process("biz", vars(&[])).await.unwrap();
    match handle.state {
        ProcessState::Completed { variables } => {
            assert_eq!(variables.get("recovered"), Some(&Value::Bool(true)));
            assert_eq!(variables.get("code"), Some(&Value::String("CREDIT".to_string())));
        }
        other => panic!("expected completion, got {:?}", other),
    }
}

#[tokio::test]
async fn undeclared_failure_without_any_handler_surfaces() {
    init_tracing();
    let engine = Engine::new();
    let definition = ProcessDefinition::builder("fatal")
        .activity(Activity::new("call", BehaviorKind::Task).prop(props::DELEGATE, "fail"))
        .activity(Activity::new("done", BehaviorKind::NoneEndEvent))
        .transition("call", "done")
        .build()
        .unwrap();
    engine.register_definition(definition).await.unwrap();
    engine.register_delegate("fail", Arc::new(Fail)).await;

    let result = engine.start_process("fatal", vars(&[])).await;
    assert!(matches!(result, Err(EngineError::Delegate(_))));
}

#[tokio::test]
async fn undeclared_failure_is_absorbed_by_a_catch_all() {
    init_tracing();
    let engine = Engine::new();
    let definition = ProcessDefinition::builder("caught")
        .catch_error(ErrorEventDefinition::catch_all("cleanup"))
        .activity(Activity::new("call", BehaviorKind::Task).prop(props::DELEGATE, "fail"))
        .activity(Activity::new("done", BehaviorKind::NoneEndEvent))
        .activity(Activity::new("cleanup", BehaviorKind::Task).prop(props::DELEGATE, "mark"))
        .transition("call", "done")
        .build()
        .unwrap();
    engine.register_definition(definition).await.unwrap();
    engine.register_delegate("fail", Arc::new(Fail)).await;
    engine
        .register_delegate(
            "mark",
            Arc::new(SetVar {
                name: "cleaned".to_string(),
                value: Value::Bool(true),
            }),
        )
        .await;

    let handle = engine.start_process("caught", vars(&[])).await.unwrap();
    match handle.state {
        ProcessState::Completed { variables } => {
            assert_eq!(variables.get("cleaned"), Some(&Value::Bool(true)));
        }
        other => panic!("expected completion, got {:?}", other),
    }
}

/// Error raised two call-activity levels deep: each crossed boundary runs
/// its completing hand-off (output mappings) before the outermost handler
/// resumes with the error-code variable set.
#[tokio::test]
async fn error_crosses_nested_process_instances_with_handoff() {
    init_tracing();
    let engine = Engine::new();

    let inner = ProcessDefinition::builder("inner")
        .activity(Activity::new("iwork", BehaviorKind::Task).prop(props::DELEGATE, "produce"))
        .activity(
            Activity::new("ithrow", BehaviorKind::ErrorEndEvent).prop(props::ERROR_CODE, "E1"),
        )
        .transition("iwork", "ithrow")
        .build()
        .unwrap();

    let mid = ProcessDefinition::builder("mid")
        .activity(
            Activity::new("call-inner", BehaviorKind::CallActivity)
                .prop(props::CALLED_ELEMENT, "inner")
                .prop(props::OUT_MAPPINGS, "midVar=innerVar"),
        )
        .activity(Activity::new("mdone", BehaviorKind::NoneEndEvent))
        .transition("call-inner", "mdone")
        .build()
        .unwrap();

    let top = ProcessDefinition::builder("top")
        .activity(
            Activity::new("call-mid", BehaviorKind::CallActivity)
                .prop(props::CALLED_ELEMENT, "mid")
                .prop(props::OUT_MAPPINGS, "topVar=midVar")
                .catch_error(ErrorEventDefinition::for_code("catch", "E1").with_code_variable("code")),
        )
        .activity(Activity::new("tdone", BehaviorKind::NoneEndEvent))
        .activity(Activity::new("catch", BehaviorKind::Task).prop(props::DELEGATE, "mark"))
        .transition("call-mid", "tdone")
        .build()
        .unwrap();

    engine.register_definition(inner).await.unwrap();
    engine.register_definition(mid).await.unwrap();
    engine.register_definition(top).await.unwrap();
    engine
        .register_delegate(
            "produce",
            Arc::new(SetVar {
                name: "innerVar".to_string(),
                value: Value::String("v".to_string()),
            }),
        )
        .await;
    engine
        .register_delegate(
            "mark",
            Arc::new(SetVar {
                name: "caught".to_string(),
                value: Value::Bool(true),
            }),
        )
        .await;

    let mut rx = engine.subscribe_events();
    let handle = engine.start_process("top", vars(&[])).await.unwrap();

    match handle.state {
        ProcessState::Completed { variables } => {
            // one hand-off per boundary: inner -> mid, then mid -> top
            assert_eq!(variables.get("topVar"), Some(&Value::String("v".to_string())));
            assert_eq!(variables.get("code"), Some(&Value::String("E1".to_string())));
            assert_eq!(variables.get("caught"), Some(&Value::Bool(true)));
        }
        other => panic!("expected completion, got {:?}", other),
    }

    // all three instances ended: the two abandoned callees and the top
    let events = drain_events(&mut rx);
    let ended = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::ProcessInstanceEnded { .. }))
        .count();
    assert_eq!(ended, 3);
}
