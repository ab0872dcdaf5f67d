mod common;

use common::{drain_events, vars};
use std::collections::HashMap;
use stepcore::events::{EngineEvent, EventBus, SubscriptionKind};
use stepcore::{props, Activity, BehaviorKind, ProcessDefinition, ScopeRef, Value};
use stepruntime::ExecutionTree;

fn new_tree() -> (ExecutionTree, stepcore::ExecutionId) {
    ExecutionTree::new_process_instance(EventBus::new(64), "p", HashMap::new())
}

#[test]
fn concurrency_is_derived_from_live_sibling_count() {
    let (mut tree, root) = new_tree();
    assert!(!tree.is_concurrent(root));

    let first = tree.create_child(root).unwrap();
    assert!(!tree.is_concurrent(first), "an only child is not concurrent");

    let second = tree.create_child(root).unwrap();
    assert!(tree.is_concurrent(first));
    assert!(tree.is_concurrent(second));

    tree.remove(second).unwrap();
    assert!(
        !tree.is_concurrent(first),
        "concurrency ends when the sibling group shrinks below two"
    );
}

#[test]
fn removal_detaches_the_whole_subtree() {
    let (mut tree, root) = new_tree();
    let child = tree.create_child(root).unwrap();
    let grandchild = tree.create_child(child).unwrap();

    tree.remove(child).unwrap();
    assert!(!tree.contains(child));
    assert!(!tree.contains(grandchild));
    assert!(tree.children(root).is_empty());
}

#[test]
fn parked_siblings_are_found_by_activity() {
    let (mut tree, root) = new_tree();
    let a = tree.create_child(root).unwrap();
    let b = tree.create_child(root).unwrap();
    let c = tree.create_child(root).unwrap();
    for (id, activity) in [(a, "gw"), (b, "gw"), (c, "elsewhere")] {
        tree.get_mut(id).unwrap().activity = Some(activity.to_string());
    }
    tree.inactivate(a).unwrap();
    tree.inactivate(b).unwrap();

    let mut parked = tree.find_inactive_concurrent_executions(a, "gw").unwrap();
    parked.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(parked, expected);

    // c is at the activity but still active
    tree.get_mut(c).unwrap().activity = Some("gw".to_string());
    let parked = tree.find_inactive_concurrent_executions(a, "gw").unwrap();
    assert_eq!(parked.len(), 2);
}

#[test]
fn variables_resolve_upward_and_shadow() {
    let (mut tree, root) = new_tree();
    let child = tree.create_child(root).unwrap();
    tree.set_variable_local(root, "a", Value::Number(1.0)).unwrap();
    tree.set_variable_local(root, "b", Value::Number(2.0)).unwrap();
    tree.set_variable_local(child, "a", Value::Number(10.0)).unwrap();

    assert_eq!(tree.variable(child, "a"), Some(&Value::Number(10.0)));
    assert_eq!(tree.variable(child, "b"), Some(&Value::Number(2.0)));
    assert_eq!(tree.variable(root, "a"), Some(&Value::Number(1.0)));

    let visible = tree.visible_variables(child);
    assert_eq!(visible.get("a"), Some(&Value::Number(10.0)));

    // set_variable updates the nearest holder, falling back to the root
    tree.set_variable(child, "b", Value::Number(20.0)).unwrap();
    assert_eq!(tree.variable(root, "b"), Some(&Value::Number(20.0)));
    tree.set_variable(child, "fresh", Value::Bool(true)).unwrap();
    assert_eq!(tree.variable(root, "fresh"), Some(&Value::Bool(true)));
}

#[test]
fn activity_execution_mapping_resolves_scopes() {
    let definition = ProcessDefinition::builder("p")
        .activity(Activity::new("sub", BehaviorKind::SubProcess).prop(props::INITIAL, "work"))
        .activity(Activity::new("work", BehaviorKind::Task).in_scope("sub"))
        .build()
        .unwrap();

    let (mut tree, root) = new_tree();
    let scope = tree.create_child(root).unwrap();
    {
        let s = tree.get_mut(scope).unwrap();
        s.is_scope = true;
        s.activity = Some("sub".to_string());
    }
    let worker = tree.create_child(scope).unwrap();
    tree.get_mut(worker).unwrap().activity = Some("work".to_string());

    let mapping = tree.create_activity_execution_mapping(root, &definition).unwrap();
    assert_eq!(mapping.get(&ScopeRef::Activity("sub".to_string())), Some(&scope));
    assert_eq!(mapping.get(&ScopeRef::ProcessRoot), Some(&root));
}

#[test]
fn double_occupancy_of_a_scope_is_a_defect() {
    let definition = ProcessDefinition::builder("p")
        .activity(Activity::new("sub", BehaviorKind::SubProcess).prop(props::INITIAL, "work"))
        .activity(Activity::new("work", BehaviorKind::Task).in_scope("sub"))
        .build()
        .unwrap();

    let (mut tree, root) = new_tree();
    for _ in 0..2 {
        let scope = tree.create_child(root).unwrap();
        let s = tree.get_mut(scope).unwrap();
        s.is_scope = true;
        s.activity = Some("sub".to_string());
    }

    let result = tree.create_activity_execution_mapping(root, &definition);
    assert!(matches!(result, Err(stepcore::EngineError::Invariant(_))));
}

#[test]
fn subscriptions_are_announced_on_the_bus() {
    let bus = EventBus::new(64);
    let mut rx = bus.subscribe();
    let (mut tree, root) = ExecutionTree::new_process_instance(bus, "p", vars(&[]));

    tree.create_subscription(root, SubscriptionKind::Compensate, "undo")
        .unwrap();
    tree.remove_subscription(root, SubscriptionKind::Compensate, "undo")
        .unwrap();

    let events = drain_events(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::EventSubscriptionCreated { handler_activity, .. } if handler_activity == "undo")));
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::EventSubscriptionRemoved { handler_activity, .. } if handler_activity == "undo")));
}

#[test]
fn leaves_delegate_occupancy() {
    let (mut tree, root) = new_tree();
    let a = tree.create_child(root).unwrap();
    let b = tree.create_child(root).unwrap();
    let b1 = tree.create_child(b).unwrap();

    let mut leaves = tree.leaf_executions(root);
    leaves.sort();
    let mut expected = vec![a, b1];
    expected.sort();
    assert_eq!(leaves, expected);
}
