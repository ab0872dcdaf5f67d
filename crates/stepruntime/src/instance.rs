use crate::tree::ExecutionTree;
use stepcore::events::{ActivityInstanceId, ExecutionId};
use stepcore::{ActivityId, Result};

/// Logical occupancy of an activity, reconstructed on demand from the
/// execution tree for reporting. The node tree mirrors activity nesting,
/// not the execution tree's shape: structural concurrency levels are
/// invisible here.
#[derive(Debug, Clone)]
pub struct ActivityInstanceNode {
    pub id: Option<ActivityInstanceId>,
    /// `None` marks the process-instance root node.
    pub activity: Option<ActivityId>,
    pub children: Vec<ActivityInstanceNode>,
    pub transitions: Vec<TransitionInstanceNode>,
}

/// A token currently in-flight on a transition towards an activity.
#[derive(Debug, Clone)]
pub struct TransitionInstanceNode {
    pub execution: ExecutionId,
    pub target_activity: ActivityId,
}

/// Builds the activity-instance tree of one process instance.
pub fn activity_instance_tree(
    tree: &ExecutionTree,
    instance: ExecutionId,
) -> Result<ActivityInstanceNode> {
    let root = tree.process_instance_root(instance)?;
    let root_execution = tree.get(root)?;
    let mut node = ActivityInstanceNode {
        id: root_execution.activity_instance,
        activity: None,
        children: Vec::new(),
        transitions: Vec::new(),
    };
    // a root without children occupies its current activity itself
    if let Some(activity) = root_execution.activity.clone() {
        node.children.push(ActivityInstanceNode {
            id: root_execution.activity_instance,
            activity: Some(activity),
            children: Vec::new(),
            transitions: Vec::new(),
        });
    }
    build_children(tree, root, &mut node)?;
    Ok(node)
}

fn build_children(
    tree: &ExecutionTree,
    execution: ExecutionId,
    parent: &mut ActivityInstanceNode,
) -> Result<()> {
    for child in tree.children(execution).to_vec() {
        let e = tree.get(child)?;
        if let Some(transition) = &e.transition {
            parent.transitions.push(TransitionInstanceNode {
                execution: child,
                target_activity: transition.destination.clone(),
            });
            continue;
        }
        match e.activity.clone() {
            Some(activity) => {
                let mut node = ActivityInstanceNode {
                    id: e.activity_instance,
                    activity: Some(activity),
                    children: Vec::new(),
                    transitions: Vec::new(),
                };
                build_children(tree, child, &mut node)?;
                parent.children.push(node);
            }
            None => {
                // structural concurrency level: hoist its children
                build_children(tree, child, parent)?;
            }
        }
    }
    Ok(())
}
