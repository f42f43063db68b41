//! Error types for device memory and execution graphs.

use thiserror::Error;

/// Errors surfaced by the emulated device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Device memory could not be obtained.
    #[error("out of device memory: requested {requested} B, available {available} B")]
    OutOfMemory {
        /// Bytes requested by the allocation.
        requested: usize,
        /// Bytes still available under the configured limit.
        available: usize,
    },
    /// A device-to-host copy failed.
    #[error("device-to-host copy of {bytes} B failed")]
    CopyFailed {
        /// Size of the attempted copy.
        bytes: usize,
    },
}

/// Errors raised while building or instantiating an execution graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Node does not exist (never added, or removed).
    #[error("invalid graph node")]
    InvalidNode,
    /// Adding the dependency would create a cycle.
    #[error("dependency would create a cycle")]
    CycleDetected,
    /// The dependency already exists.
    #[error("dependency already present")]
    DuplicateEdge,
}

/// Convenience alias for device operations.
pub type Result<T> = std::result::Result<T, DeviceError>;
