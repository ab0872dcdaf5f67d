use crate::tree::ExecutionTree;
use stepcore::events::ExecutionId;
use stepcore::{ProcessDefinition, ScopeRef};

/// Visitor invoked once per element of an upward traversal, in traversal
/// order, before the walker evaluates its stop condition.
pub trait Collector<T> {
    fn collect(&mut self, element: &T);
}

/// Lazy, finite, non-restartable upward traversal over any "has-parent"
/// chain. The chain is produced by a `next` function returning the parent
/// of an element, or `None` at the top.
///
/// Hierarchies walked here are rooted chains, never general graphs, so no
/// element is visited twice and the walk terminates once `next` yields
/// nothing.
pub struct TreeWalker<'w, T> {
    current: Option<T>,
    next_fn: Box<dyn Fn(&T) -> Option<T> + 'w>,
    collectors: Vec<&'w mut dyn Collector<T>>,
}

impl<'w, T> TreeWalker<'w, T> {
    pub fn new(initial: Option<T>, next_fn: impl Fn(&T) -> Option<T> + 'w) -> Self {
        Self {
            current: initial,
            next_fn: Box::new(next_fn),
            collectors: Vec::new(),
        }
    }

    /// Registers a collector. Collectors run in registration order.
    pub fn add_collector(&mut self, collector: &'w mut dyn Collector<T>) {
        self.collectors.push(collector);
    }

    /// Walks upward until the condition turns true (inclusive of that
    /// element) or the chain is exhausted. Collectors see every visited
    /// element, including the one the walk stops on. Walking an absent
    /// initial element visits nothing.
    pub fn walk_until(mut self, condition: impl Fn(&T) -> bool) -> Option<T> {
        loop {
            let current = self.current.take()?;
            for collector in self.collectors.iter_mut() {
                collector.collect(&current);
            }
            if condition(&current) {
                return Some(current);
            }
            self.current = (self.next_fn)(&current);
        }
    }

    /// Same walk; the name reads better when the condition describes the
    /// found state of a scope search.
    pub fn walk_while(self, condition: impl Fn(&T) -> bool) -> Option<T> {
        self.walk_until(condition)
    }
}

/// Walks the flow-scope hierarchy of a process definition from a scope up
/// to the definition root.
pub fn flow_scope_walker<'w>(
    definition: &'w ProcessDefinition,
    initial: ScopeRef,
) -> TreeWalker<'w, ScopeRef> {
    TreeWalker::new(Some(initial), move |scope| {
        definition.scope_flow_scope(scope)
    })
}

/// Walks a hierarchy of process instances from leaf to top, visiting one
/// execution per instance: each step follows the super-execution of the
/// current execution's process instance.
pub fn leaf_execution_hierarchy_walker<'w>(
    tree: &'w ExecutionTree,
    initial: ExecutionId,
) -> TreeWalker<'w, ExecutionId> {
    TreeWalker::new(Some(initial), move |execution| {
        tree.super_execution_of_instance(*execution)
    })
}
