use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use stepcore::ProcessDefinition;

/// Forward-reachability index over a process graph, built once per
/// registered definition and consulted by inclusive-join decisions.
///
/// Every transition contributes an edge. An activity without outgoing
/// transitions is a dead end for its branch; control continues from its
/// enclosing scope, so such activities get an edge to their flow-scope
/// activity (none when the scope is the definition root). Cycles in the
/// process graph are handled by the traversal's visit map.
pub struct ReachabilityIndex {
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
}

impl ReachabilityIndex {
    pub fn build(definition: &ProcessDefinition) -> Self {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();

        for id in definition.activities.keys() {
            let index = graph.add_node(id.clone());
            nodes.insert(id.clone(), index);
        }

        for activity in definition.activities.values() {
            let source = nodes[&activity.id];
            if activity.outgoing.is_empty() {
                if let Some(scope) = &activity.flow_scope {
                    graph.add_edge(source, nodes[scope], ());
                }
            } else {
                for transition in &activity.outgoing {
                    graph.add_edge(source, nodes[&transition.destination], ());
                }
            }
        }

        Self { graph, nodes }
    }

    /// Whether `to` can still be reached from `from` by walking forward
    /// through transitions and upward through scope boundaries.
    pub fn is_reachable(&self, from: &str, to: &str) -> bool {
        match (self.nodes.get(from), self.nodes.get(to)) {
            (Some(from), Some(to)) => has_path_connecting(&self.graph, *from, *to, None),
            _ => false,
        }
    }
}
