#![allow(dead_code)]

use std::collections::HashMap;
use stepcore::events::EngineEvent;
use stepcore::Value;
use stepruntime::ActivityInstanceNode;
use tokio::sync::broadcast;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub fn vars(entries: &[(&str, Value)]) -> HashMap<String, Value> {
    entries
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

pub fn drain_events(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Expected shape of an activity-instance tree, matched structurally and
/// order-insensitively against the derived tree.
pub struct ExpectedInstance {
    pub activity: Option<String>,
    pub children: Vec<ExpectedInstance>,
}

pub fn root(children: Vec<ExpectedInstance>) -> ExpectedInstance {
    ExpectedInstance {
        activity: None,
        children,
    }
}

pub fn instance(activity: &str, children: Vec<ExpectedInstance>) -> ExpectedInstance {
    ExpectedInstance {
        activity: Some(activity.to_string()),
        children,
    }
}

pub fn leaf(activity: &str) -> ExpectedInstance {
    instance(activity, Vec::new())
}

/// Multiset tree matching: children pair up in any order, each expected
/// child consumed at most once.
pub fn tree_matches(expected: &ExpectedInstance, actual: &ActivityInstanceNode) -> bool {
    if expected.activity.as_deref() != actual.activity.as_deref() {
        return false;
    }
    if expected.children.len() != actual.children.len() {
        return false;
    }
    let mut unmatched: Vec<&ExpectedInstance> = expected.children.iter().collect();
    for actual_child in &actual.children {
        match unmatched
            .iter()
            .position(|candidate| tree_matches(candidate, actual_child))
        {
            Some(index) => {
                unmatched.remove(index);
            }
            None => return false,
        }
    }
    true
}

pub fn assert_instance_structure(expected: &ExpectedInstance, actual: &ActivityInstanceNode) {
    assert!(
        tree_matches(expected, actual),
        "activity instance tree mismatch, actual: {:#?}",
        actual
    );
}
