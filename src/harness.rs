//! Reference producers: work submitted as an execution graph.
//!
//! Each producer records its nodes into the graph lent by a [`GraphReceiver`]
//! and then completes that receiver exactly once. They stand in for the
//! scheduler under test when exercising the tracer and flag store together.

use crate::device::Grid;
use crate::error::GraphError;
use crate::exec_graph::{ExecGraph, GraphNode};
use crate::flags::Flags;
use crate::receiver::{CompletionError, GraphReceiver};
use crate::tracer::CompletionTracer;

/// Something that records work into a receiver's graph and completes it.
pub trait GraphProducer<'k> {
    /// Record the work and deliver exactly one completion.
    fn start<R>(self, receiver: R)
    where
        R: GraphReceiver<'k, Value = Vec<GraphNode>, Error = CompletionError>;
}

/// Shape of the graph a [`GraphPipeline`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineShape {
    /// `n` single-thread kernels, each depending on the previous one.
    Chain(usize),
    /// An empty root, `n` independent kernels, and an empty join.
    FanOut(usize),
    /// One kernel node over an `n`-thread grid.
    Grid(usize),
}

impl PipelineShape {
    /// Flag slots the pipeline touches, one per unit of work.
    pub fn slots(&self) -> usize {
        match *self {
            PipelineShape::Chain(n) | PipelineShape::FanOut(n) | PipelineShape::Grid(n) => n,
        }
    }

    /// Nodes the pipeline records.
    pub fn expected_nodes(&self) -> usize {
        match *self {
            PipelineShape::Chain(n) => n,
            PipelineShape::FanOut(n) => n + 2,
            PipelineShape::Grid(_) => 1,
        }
    }

    /// Edges the pipeline records.
    pub fn expected_edges(&self) -> usize {
        match *self {
            PipelineShape::Chain(n) => n.saturating_sub(1),
            PipelineShape::FanOut(n) => 2 * n,
            PipelineShape::Grid(_) => 0,
        }
    }
}

/// Kernels that each set their own flag slot once.
#[derive(Debug, Clone, Copy)]
pub struct GraphPipeline<'s> {
    flags: Flags<'s>,
    shape: PipelineShape,
}

impl<'s> GraphPipeline<'s> {
    /// A pipeline of `shape` whose kernels set slots through `flags`.
    pub fn new(flags: Flags<'s>, shape: PipelineShape) -> Self {
        Self { flags, shape }
    }

    fn record<'k>(&self, graph: &mut ExecGraph<'k>) -> Result<Vec<GraphNode>, GraphError>
    where
        's: 'k,
    {
        let flags = self.flags;
        match self.shape {
            PipelineShape::Chain(n) => {
                let mut tail: Vec<GraphNode> = Vec::new();
                for slot in 0..n {
                    let node = graph.add_kernel_node(&tail, Grid::single(), move |_| flags.set(slot))?;
                    tail = vec![node];
                }
                Ok(tail)
            }
            PipelineShape::FanOut(n) => {
                let root = graph.add_empty_node(&[])?;
                let branches = (0..n)
                    .map(|slot| graph.add_kernel_node(&[root], Grid::single(), move |_| flags.set(slot)))
                    .collect::<Result<Vec<_>, _>>()?;
                let join = graph.add_empty_node(&branches)?;
                Ok(vec![join])
            }
            PipelineShape::Grid(n) => {
                let node = graph.add_kernel_node(&[], Grid::linear(n), move |idx| flags.set(idx.global()))?;
                Ok(vec![node])
            }
        }
    }
}

impl<'s: 'k, 'k> GraphProducer<'k> for GraphPipeline<'s> {
    fn start<R>(self, mut receiver: R)
    where
        R: GraphReceiver<'k, Value = Vec<GraphNode>, Error = CompletionError>,
    {
        match self.record(receiver.graph()) {
            Ok(terminal) => receiver.set_value(terminal),
            Err(err) => receiver.set_error(Box::new(err)),
        }
    }
}

/// Records nothing and reports cancellation.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoppedProducer;

impl<'k> GraphProducer<'k> for StoppedProducer {
    fn start<R>(self, receiver: R)
    where
        R: GraphReceiver<'k, Value = Vec<GraphNode>, Error = CompletionError>,
    {
        receiver.set_stopped();
    }
}

/// Records nothing and reports a failure.
#[derive(Debug, Clone)]
pub struct FailingProducer {
    message: String,
}

impl FailingProducer {
    /// A producer that fails with `message` as the error payload.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl<'k> GraphProducer<'k> for FailingProducer {
    fn start<R>(self, receiver: R)
    where
        R: GraphReceiver<'k, Value = Vec<GraphNode>, Error = CompletionError>,
    {
        receiver.set_error(self.message.into());
    }
}

/// Instantiate the tracer's graph and launch it synchronously.
pub fn launch_recorded(tracer: &CompletionTracer<'_>) -> Result<(), GraphError> {
    tracer.graph().instantiate()?.launch();
    Ok(())
}
