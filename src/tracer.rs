//! Completion tracer: counts how a producer completed and what it recorded.
//!
//! The tracer owns an [`ExecGraph`] for its whole lifetime. [`CompletionTracer::get`]
//! hands out a [`TracedReceiver`] that lends the graph to the producer under test
//! and counts every completion it receives. Nothing is enforced: a producer that
//! completes twice, or with two different outcomes, shows up in the counters so
//! the test can fail on it.
//!
//! ```ignore
//! let mut tracer = CompletionTracer::new(&device);
//! producer.start(tracer.get());
//! assert!(tracer.set_value_was_called_once());
//! assert_eq!(tracer.num_nodes(), 3);
//! ```

use crate::device::Device;
use crate::exec_graph::{ExecGraph, GraphNode};
use crate::invariant_ppt::{record_invariant, TRACER_OUTCOME_RECORDED, TRACER_TOPOLOGY_CAPTURED};
use crate::receiver::{CompletionError, CompletionKind, GraphReceiver, Receiver};
use tracing::trace;

/// How many times each outcome was delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    /// `set_value` calls.
    pub value: usize,
    /// `set_stopped` calls.
    pub stopped: usize,
    /// `set_error` calls.
    pub error: usize,
}

impl OutcomeCounts {
    /// Total completions of any kind.
    pub fn total(&self) -> usize {
        self.value + self.stopped + self.error
    }

    /// Count for one outcome.
    pub fn of(&self, kind: CompletionKind) -> usize {
        match kind {
            CompletionKind::Value => self.value,
            CompletionKind::Stopped => self.stopped,
            CompletionKind::Error => self.error,
        }
    }
}

#[derive(Debug)]
struct TracerState<'k> {
    graph: ExecGraph<'k>,
    counts: OutcomeCounts,
    num_nodes: usize,
    num_edges: usize,
    terminal_nodes: Vec<GraphNode>,
}

impl TracerState<'_> {
    fn record(&mut self, kind: CompletionKind) {
        match kind {
            CompletionKind::Value => self.counts.value += 1,
            CompletionKind::Stopped => self.counts.stopped += 1,
            CompletionKind::Error => self.counts.error += 1,
        }
        trace!(outcome = %kind, calls = self.counts.of(kind), "completion observed");
        record_invariant(TRACER_OUTCOME_RECORDED);
    }
}

/// Owner of the traced graph and the outcome counters.
#[derive(Debug)]
pub struct CompletionTracer<'k> {
    state: TracerState<'k>,
}

impl<'k> CompletionTracer<'k> {
    /// Create a tracer with an empty graph on `device`.
    pub fn new(device: &Device) -> Self {
        Self {
            state: TracerState {
                graph: ExecGraph::create(device),
                counts: OutcomeCounts::default(),
                num_nodes: 0,
                num_edges: 0,
                terminal_nodes: Vec::new(),
            },
        }
    }

    /// A receiver for one producer. It borrows the tracer until it completes.
    pub fn get(&mut self) -> TracedReceiver<'_, 'k> {
        TracedReceiver {
            state: &mut self.state,
        }
    }

    /// The traced graph as it is now.
    pub fn graph(&self) -> &ExecGraph<'k> {
        &self.state.graph
    }

    /// Snapshot of every counter.
    pub fn outcome_counts(&self) -> OutcomeCounts {
        self.state.counts
    }

    /// Whether `set_value` was delivered at least once.
    pub fn set_value_was_called(&self) -> bool {
        self.state.counts.value > 0
    }

    /// Whether `set_stopped` was delivered at least once.
    pub fn set_stopped_was_called(&self) -> bool {
        self.state.counts.stopped > 0
    }

    /// Whether `set_error` was delivered at least once.
    pub fn set_error_was_called(&self) -> bool {
        self.state.counts.error > 0
    }

    /// Whether `set_value` was delivered exactly once.
    pub fn set_value_was_called_once(&self) -> bool {
        self.state.counts.value == 1
    }

    /// Whether `set_stopped` was delivered exactly once.
    pub fn set_stopped_was_called_once(&self) -> bool {
        self.state.counts.stopped == 1
    }

    /// Whether `set_error` was delivered exactly once.
    pub fn set_error_was_called_once(&self) -> bool {
        self.state.counts.error == 1
    }

    /// Node count captured by the latest `set_value`; 0 if there was none.
    pub fn num_nodes(&self) -> usize {
        self.state.num_nodes
    }

    /// Edge count captured by the latest `set_value`; 0 if there was none.
    pub fn num_edges(&self) -> usize {
        self.state.num_edges
    }

    /// Terminal nodes reported by the latest `set_value`.
    pub fn terminal_nodes(&self) -> &[GraphNode] {
        &self.state.terminal_nodes
    }
}

/// Receiver view into a [`CompletionTracer`].
#[derive(Debug)]
pub struct TracedReceiver<'t, 'k> {
    state: &'t mut TracerState<'k>,
}

impl Receiver for TracedReceiver<'_, '_> {
    /// Terminal nodes of the recorded work.
    type Value = Vec<GraphNode>;
    type Error = CompletionError;

    fn set_value(self, terminal_nodes: Vec<GraphNode>) {
        let state = self.state;
        state.num_nodes = state.graph.node_count();
        state.num_edges = state.graph.edge_count();
        state.terminal_nodes = terminal_nodes;
        record_invariant(TRACER_TOPOLOGY_CAPTURED);
        state.record(CompletionKind::Value);
    }

    fn set_stopped(self) {
        self.state.record(CompletionKind::Stopped);
    }

    fn set_error(self, error: CompletionError) {
        trace!(%error, "error completion payload discarded");
        self.state.record(CompletionKind::Error);
    }
}

impl<'k> GraphReceiver<'k> for TracedReceiver<'_, 'k> {
    fn graph(&mut self) -> &mut ExecGraph<'k> {
        &mut self.state.graph
    }
}
