mod common;

use common::{assert_instance_structure, init_tracing, instance, leaf, root, vars};
use stepcore::{props, Activity, BehaviorKind, ProcessDefinition};
use stepruntime::Engine;

#[tokio::test]
async fn single_token_occupies_one_activity() {
    init_tracing();
    let engine = Engine::new();
    let definition = ProcessDefinition::builder("one")
        .activity(Activity::new("wait", BehaviorKind::ReceiveTask))
        .build()
        .unwrap();
    engine.register_definition(definition).await.unwrap();

    let handle = engine.start_process("one", vars(&[])).await.unwrap();
    let tree = engine.activity_instances(handle.instance).await.unwrap();

    assert_instance_structure(&root(vec![leaf("wait")]), &tree);
}

#[tokio::test]
async fn concurrent_levels_are_invisible_in_the_instance_tree() {
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
    let tree = engine.activity_instances(handle.instance).await.unwrap();

    // the structural fork level does not appear; both tokens hang off the
    // process root
    assert_instance_structure(&root(vec![leaf("left"), leaf("right")]), &tree);
}

#[tokio::test]
async fn scope_nesting_shows_as_instance_nesting() {
    init_tracing();
    let engine = Engine::new();
    let definition = ProcessDefinition::builder("nested")
        .activity(Activity::new("sub", BehaviorKind::SubProcess).prop(props::INITIAL, "inner"))
        .activity(Activity::new("inner", BehaviorKind::ReceiveTask).in_scope("sub"))
        .build()
        .unwrap();
    engine.register_definition(definition).await.unwrap();

    let handle = engine.start_process("nested", vars(&[])).await.unwrap();
    let tree = engine.activity_instances(handle.instance).await.unwrap();

    assert_instance_structure(&root(vec![instance("sub", vec![leaf("inner")])]), &tree);
}

#[tokio::test]
async fn structural_mismatch_is_detected() {
    init_tracing();
    let engine = Engine::new();
    let definition = ProcessDefinition::builder("two")
        .activity(Activity::new("fork", BehaviorKind::Task))
        .activity(Activity::new("a", BehaviorKind::ReceiveTask))
        .activity(Activity::new("b", BehaviorKind::ReceiveTask))
        .transition("fork", "a")
        .transition("fork", "b")
        .build()
        .unwrap();
    engine.register_definition(definition).await.unwrap();

    let handle = engine.start_process("two", vars(&[])).await.unwrap();
    let tree = engine.activity_instances(handle.instance).await.unwrap();

    assert!(!common::tree_matches(&root(vec![leaf("a")]), &tree));
    assert!(!common::tree_matches(
        &root(vec![leaf("a"), leaf("missing")]),
        &tree
    ));
}
