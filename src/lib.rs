//! Verification primitives for graph-structured accelerator execution.
//!
//! - [`flags::FlagStore`]: device counters that prove each unit of work ran exactly once.
//! - [`tracer::CompletionTracer`]: counts value/stopped/error completions and captures
//!   the topology of the execution graph a producer recorded.

pub mod device;
pub mod error;
pub mod exec;
pub mod exec_graph;
pub mod flags;
pub mod harness;
#[doc(hidden)]
pub mod invariant_ppt;
pub mod receiver;
pub mod tracer;

pub use device::{Device, DeviceConfig, DeviceFault, DeviceStats, Grid, ThreadIdx};
pub use error::{DeviceError, GraphError};
pub use exec_graph::{ExecGraph, GraphNode};
pub use flags::{FlagStore, Flags};
pub use receiver::{complete, Completion, CompletionError, CompletionKind, GraphReceiver, Receiver};
pub use tracer::{CompletionTracer, OutcomeCounts, TracedReceiver};
