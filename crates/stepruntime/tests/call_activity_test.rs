mod common;

use async_trait::async_trait;
use common::{init_tracing, vars};
use std::sync::Arc;
use stepcore::{
    props, Activity, BehaviorKind, DelegateContext, DelegateError, DelegateOutput,
    ProcessDefinition, ServiceDelegate, Value,
};
use stepruntime::{Engine, ProcessState};

/// Doubles the `amount` variable it was handed.
struct Doubler;

#[async_trait]
impl ServiceDelegate for Doubler {
    async fn execute(&self, ctx: DelegateContext) -> Result<DelegateOutput, DelegateError> {
        let amount = ctx
            .require_variable("amount")?
            .as_f64()
            .ok_or_else(|| DelegateError::ExecutionFailed("amount is not a number".into()))?;
        Ok(DelegateOutput::new().with_variable("doubled", amount * 2.0))
    }
}

#[tokio::test]
async fn call_activity_maps_variables_in_and_out() {
    init_tracing();
    let engine = Engine::new();

    let callee = ProcessDefinition::builder("doubling")
        .activity(Activity::new("double", BehaviorKind::Task).prop(props::DELEGATE, "doubler"))
        .activity(Activity::new("done", BehaviorKind::NoneEndEvent))
        .transition("double", "done")
        .build()
        .unwrap();

    let caller = ProcessDefinition::builder("billing")
        .activity(
            Activity::new("call", BehaviorKind::CallActivity)
                .prop(props::CALLED_ELEMENT, "doubling")
                .prop(props::IN_MAPPINGS, "amount=total")
                .prop(props::OUT_MAPPINGS, "result=doubled"),
        )
        .activity(Activity::new("finish", BehaviorKind::NoneEndEvent))
        .transition("call", "finish")
        .build()
        .unwrap();

    engine.register_definition(callee).await.unwrap();
    engine.register_definition(caller).await.unwrap();
    engine.register_delegate("doubler", Arc::new(Doubler)).await;

    let handle = engine
        .start_process("billing", vars(&[("total", Value::Number(21.0))]))
        .await
        .unwrap();

    match handle.state {
        ProcessState::Completed { variables } => {
            assert_eq!(variables.get("result"), Some(&Value::Number(42.0)));
            // callee-local state never leaks across the boundary
            assert!(variables.get("doubled").is_none());
            assert!(variables.get("amount").is_none());
        }
        other => panic!("expected completion, got {:?}", other),
    }
}

#[tokio::test]
async fn called_instance_waits_inside_the_callee() {
    init_tracing();
    let engine = Engine::new();

    let callee = ProcessDefinition::builder("slow")
        .activity(Activity::new("pause", BehaviorKind::ReceiveTask))
        .activity(Activity::new("done", BehaviorKind::NoneEndEvent))
        .transition("pause", "done")
        .build()
        .unwrap();

    let caller = ProcessDefinition::builder("outer")
        .activity(
            Activity::new("call", BehaviorKind::CallActivity).prop(props::CALLED_ELEMENT, "slow"),
        )
        .activity(Activity::new("finish", BehaviorKind::NoneEndEvent))
        .transition("call", "finish")
        .build()
        .unwrap();

    engine.register_definition(callee).await.unwrap();
    engine.register_definition(caller).await.unwrap();

    let handle = engine.start_process("outer", vars(&[])).await.unwrap();
    assert_eq!(handle.state, ProcessState::Active);

    // the waiting token lives in the called instance, inside the same tree
    let parked = engine.executions_at(handle.instance, "pause").await.unwrap();
    assert_eq!(parked.len(), 1);

    let state = engine.signal(handle.instance, parked[0], vars(&[])).await.unwrap();
    assert!(matches!(state, ProcessState::Completed { .. }));
}
