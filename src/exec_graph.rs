//! Execution graph module: the native graph handle work is recorded into.
//!
//! An [`ExecGraph`] is a DAG of empty and kernel nodes. It is created against a
//! [`Device`], which accounts for its creation and destruction so tests can
//! detect leaked or doubly destroyed handles.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use crate::device::{Device, Grid, ThreadIdx};
use crate::error::GraphError;
use crate::invariant_ppt::{assert_invariant, GRAPH_LEGALITY, GRAPH_REJECTS_INVALID};
use tracing::debug;

/// Kernel body run once per grid thread.
pub type KernelFn<'k> = Box<dyn Fn(ThreadIdx) + Send + Sync + 'k>;

/// Handle to a node within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphNode(pub(crate) usize);

impl GraphNode {
    /// Position of the node in creation order.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A dependency: `to` may only start after `from` finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dependency {
    /// Upstream node.
    pub from: GraphNode,
    /// Downstream node.
    pub to: GraphNode,
}

/// Kinds of nodes a graph can hold.
#[non_exhaustive]
pub enum NodeKind<'k> {
    /// No-op node used for joins and ordering.
    Empty,
    /// Kernel launched over a grid.
    Kernel {
        /// Launch geometry.
        grid: Grid,
        /// Kernel body.
        body: KernelFn<'k>,
    },
}

impl std::fmt::Debug for NodeKind<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Empty => write!(f, "Empty"),
            NodeKind::Kernel { grid, .. } => write!(f, "Kernel({:?})", grid),
        }
    }
}

#[derive(Debug)]
pub(crate) struct NodeData<'k> {
    pub(crate) kind: NodeKind<'k>,
}

/// An execution graph: nodes plus dependency edges, always acyclic.
#[derive(Debug)]
pub struct ExecGraph<'k> {
    device: Device,
    nodes: Vec<Option<NodeData<'k>>>,
    edges: Vec<Dependency>,
}

impl<'k> ExecGraph<'k> {
    /// Create an empty graph on `device`.
    pub fn create(device: &Device) -> Self {
        device.register_graph();
        debug!("execution graph created");
        Self {
            device: device.clone(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// The device this graph launches on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Add a no-op node depending on `deps`.
    pub fn add_empty_node(&mut self, deps: &[GraphNode]) -> Result<GraphNode, GraphError> {
        self.add_node(deps, NodeKind::Empty)
    }

    /// Add a kernel node depending on `deps`.
    pub fn add_kernel_node<K>(
        &mut self,
        deps: &[GraphNode],
        grid: Grid,
        kernel: K,
    ) -> Result<GraphNode, GraphError>
    where
        K: Fn(ThreadIdx) + Send + Sync + 'k,
    {
        self.add_node(
            deps,
            NodeKind::Kernel {
                grid,
                body: Box::new(kernel),
            },
        )
    }

    fn add_node(&mut self, deps: &[GraphNode], kind: NodeKind<'k>) -> Result<GraphNode, GraphError> {
        // Validate every dependency before mutating so a failure leaves the graph untouched.
        for &dep in deps {
            self.node(dep)?;
        }
        let id = GraphNode(self.nodes.len());
        self.nodes.push(Some(NodeData { kind }));
        for &dep in deps {
            let edge = Dependency { from: dep, to: id };
            // A fresh node has no outgoing edges, so only duplicates can be rejected.
            if !self.edges.contains(&edge) {
                self.edges.push(edge);
            }
        }
        Ok(id)
    }

    /// Add a dependency, rejecting unknown nodes, duplicates and cycles.
    pub fn add_dependency(&mut self, from: GraphNode, to: GraphNode) -> Result<(), GraphError> {
        self.node(from)?;
        self.node(to)?;

        let edge = Dependency { from, to };
        if self.edges.contains(&edge) {
            return Err(GraphError::DuplicateEdge);
        }

        if self.would_create_cycle(&edge) {
            assert_invariant(
                GRAPH_REJECTS_INVALID,
                self.would_create_cycle(&edge),
                "Cycle detected, rejecting",
                Some("add_dependency"),
            );
            return Err(GraphError::CycleDetected);
        }

        self.edges.push(edge);

        assert_invariant(
            GRAPH_LEGALITY,
            true,
            "Dependency added, graph remains acyclic",
            Some("add_dependency"),
        );
        Ok(())
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, node: GraphNode) -> Result<(), GraphError> {
        self.node(node)?;
        self.nodes[node.0] = None;
        self.edges.retain(|e| e.from != node && e.to != node);
        Ok(())
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    /// Number of dependency edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Live nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = GraphNode> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_some())
            .map(|(i, _)| GraphNode(i))
    }

    /// All dependency edges.
    pub fn edges(&self) -> &[Dependency] {
        &self.edges
    }

    /// Nodes no other node depends on.
    pub fn leaf_nodes(&self) -> Vec<GraphNode> {
        self.nodes()
            .filter(|&n| !self.edges.iter().any(|e| e.from == n))
            .collect()
    }

    /// Kind of a live node.
    pub fn kind(&self, node: GraphNode) -> Result<&NodeKind<'k>, GraphError> {
        Ok(&self.node(node)?.kind)
    }

    pub(crate) fn slots(&self) -> &[Option<NodeData<'k>>] {
        &self.nodes
    }

    fn node(&self, node: GraphNode) -> Result<&NodeData<'k>, GraphError> {
        self.nodes
            .get(node.0)
            .and_then(|n| n.as_ref())
            .ok_or(GraphError::InvalidNode)
    }

    fn would_create_cycle(&self, edge: &Dependency) -> bool {
        // Adding from -> to closes a cycle iff `to` already reaches `from`.
        let mut visited = vec![false; self.nodes.len()];
        self.dfs(edge.to, edge.from, &mut visited)
    }

    fn dfs(&self, current: GraphNode, target: GraphNode, visited: &mut [bool]) -> bool {
        if current == target {
            return true;
        }
        if visited[current.0] {
            return false;
        }
        visited[current.0] = true;
        for edge in &self.edges {
            if edge.from == current && self.dfs(edge.to, target, visited) {
                return true;
            }
        }
        false
    }
}

impl Drop for ExecGraph<'_> {
    fn drop(&mut self) {
        debug!(
            nodes = self.node_count(),
            edges = self.edge_count(),
            "execution graph destroyed"
        );
        self.device.release_graph();
    }
}
