//! Exec module: instantiate a graph into an executable launch order.

use crate::error::GraphError;
use crate::exec_graph::{ExecGraph, GraphNode, NodeKind};
use crate::invariant_ppt::{assert_invariant, EXEC_ORDER_COMPLETE};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::debug;

/// An instantiated graph: a fixed launch order over a borrowed graph.
#[derive(Debug)]
pub struct GraphExec<'g, 'k> {
    graph: &'g ExecGraph<'k>,
    order: Vec<GraphNode>,
}

impl<'k> ExecGraph<'k> {
    /// Instantiate the graph for launching.
    pub fn instantiate(&self) -> Result<GraphExec<'_, 'k>, GraphError> {
        let order = topo_sort(self)?;
        assert_invariant(
            EXEC_ORDER_COMPLETE,
            order.len() == self.node_count(),
            "Launch order covers every node",
            Some("instantiate"),
        );
        Ok(GraphExec { graph: self, order })
    }
}

impl GraphExec<'_, '_> {
    /// Nodes in launch order.
    pub fn order(&self) -> &[GraphNode] {
        &self.order
    }

    /// Launch every node in order and wait for the whole graph.
    pub fn launch(&self) {
        let device = self.graph.device();
        debug!(nodes = self.order.len(), "graph launch");
        for node in &self.order {
            let Some(data) = &self.graph.slots()[node.0] else {
                continue;
            };
            if let NodeKind::Kernel { grid, body } = &data.kind {
                device.launch_dyn(*grid, &**body);
            }
        }
    }
}

/// Topological sort of live nodes, stable by node index.
///
/// Among the nodes ready at any step, the lowest index goes first.
fn topo_sort(graph: &ExecGraph<'_>) -> Result<Vec<GraphNode>, GraphError> {
    let slots = graph.slots();
    let mut in_degree = vec![0usize; slots.len()];
    let mut adj: Vec<Vec<GraphNode>> = vec![vec![]; slots.len()];

    for edge in graph.edges() {
        adj[edge.from.0].push(edge.to);
        in_degree[edge.to.0] += 1;
    }

    let mut ready: BinaryHeap<Reverse<GraphNode>> = graph
        .nodes()
        .filter(|n| in_degree[n.0] == 0)
        .map(Reverse)
        .collect();

    let mut order = Vec::with_capacity(slots.len());
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for &next in &adj[node.0] {
            in_degree[next.0] -= 1;
            if in_degree[next.0] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() == graph.node_count() {
        Ok(order)
    } else {
        Err(GraphError::CycleDetected)
    }
}
