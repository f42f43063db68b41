//! Emulated accelerator: device memory, kernel launches and execution context.
//!
//! Device memory is host memory owned through [`DeviceCounters`], with every
//! allocation, free and copy accounted on the owning [`Device`]. Kernels run
//! on a rayon pool with the calling thread marked as device context, so code
//! can tell whether it executes "on the GPU" the way device helpers do.
//!
//! Faults can be injected to exercise the error paths of code built on top:
//!
//! ```ignore
//! let device = Device::default();
//! device.inject(DeviceFault::CopyFailure);
//! assert!(store.all_set_once().is_err());
//! ```

use crate::error::{DeviceError, Result};
use crate::invariant_ppt::{
    assert_invariant, record_invariant, COUNTERS_FREED_ONCE, COUNTERS_ZEROED,
    GRAPH_DESTROYED_ONCE, LAUNCH_SYNCHRONIZED, READBACK_COMPLETE,
};
use rayon::prelude::*;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Size of one device counter in bytes.
pub const COUNTER_BYTES: usize = std::mem::size_of::<u32>();

/// Where the calling code is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// Ordinary host thread.
    Host,
    /// Inside a kernel launched on the device.
    Device,
}

thread_local! {
    static IN_DEVICE_CONTEXT: Cell<bool> = const { Cell::new(false) };
}

/// Report the execution context of the caller.
pub fn device_type() -> DeviceType {
    if IN_DEVICE_CONTEXT.with(Cell::get) {
        DeviceType::Device
    } else {
        DeviceType::Host
    }
}

/// True when called from inside a kernel.
#[inline]
pub fn is_on_gpu() -> bool {
    device_type() == DeviceType::Device
}

/// Marks the current thread as device context until dropped.
struct DeviceContext {
    previous: bool,
}

impl DeviceContext {
    fn enter() -> Self {
        let previous = IN_DEVICE_CONTEXT.with(|c| c.replace(true));
        Self { previous }
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        IN_DEVICE_CONTEXT.with(|c| c.set(self.previous));
    }
}

/// Launch geometry: `blocks` blocks of `threads_per_block` threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    /// Number of blocks.
    pub blocks: usize,
    /// Threads in each block.
    pub threads_per_block: usize,
}

impl Grid {
    /// A single block of `threads` threads.
    pub const fn linear(threads: usize) -> Self {
        Self {
            blocks: 1,
            threads_per_block: threads,
        }
    }

    /// A single thread.
    pub const fn single() -> Self {
        Self::linear(1)
    }

    /// Total number of threads in the grid.
    ///
    /// # Panics
    ///
    /// Panics if `blocks * threads_per_block` overflows `usize`. Such a grid
    /// cannot be launched.
    pub const fn size(&self) -> usize {
        match self.blocks.checked_mul(self.threads_per_block) {
            Some(size) => size,
            None => panic!("grid size overflows usize"),
        }
    }

    fn thread_at(&self, global: usize) -> ThreadIdx {
        ThreadIdx {
            block: global / self.threads_per_block,
            thread: global % self.threads_per_block,
            threads_per_block: self.threads_per_block,
        }
    }
}

/// Position of one kernel invocation within its grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadIdx {
    /// Block index.
    pub block: usize,
    /// Thread index within the block.
    pub thread: usize,
    threads_per_block: usize,
}

impl ThreadIdx {
    /// Flattened index across the whole grid.
    pub const fn global(&self) -> usize {
        self.block * self.threads_per_block + self.thread
    }
}

/// Device construction options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Cap on live device memory in bytes; `None` means unbounded.
    pub memory_limit: Option<usize>,
    /// Run grid invocations concurrently on the rayon pool.
    pub grid_parallelism: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            memory_limit: None,
            grid_parallelism: true,
        }
    }
}

/// Faults that can be injected into a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFault {
    /// Every allocation fails with `OutOfMemory`.
    AllocFailure,
    /// Every device-to-host copy fails.
    CopyFailure,
}

/// Resource accounting snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    /// Successful allocations.
    pub allocations: u64,
    /// Frees.
    pub frees: u64,
    /// Bytes currently allocated.
    pub live_bytes: usize,
    /// Graph handles created.
    pub graphs_created: u64,
    /// Graph handles destroyed.
    pub graphs_destroyed: u64,
}

impl DeviceStats {
    /// Allocations not yet freed.
    pub fn live_allocations(&self) -> u64 {
        self.allocations - self.frees
    }

    /// Graph handles not yet destroyed.
    pub fn live_graphs(&self) -> u64 {
        self.graphs_created - self.graphs_destroyed
    }
}

#[derive(Debug, Default)]
struct DeviceInner {
    config: DeviceConfig,
    live_bytes: AtomicUsize,
    allocations: AtomicU64,
    frees: AtomicU64,
    graphs_created: AtomicU64,
    graphs_destroyed: AtomicU64,
    alloc_fault: AtomicBool,
    copy_fault: AtomicBool,
}

/// Handle to an emulated device. Clones share the same device.
#[derive(Debug, Clone, Default)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    /// Create a device with the given configuration.
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                config,
                ..DeviceInner::default()
            }),
        }
    }

    /// The configuration this device was created with.
    pub fn config(&self) -> DeviceConfig {
        self.inner.config
    }

    /// Inject a fault; it stays active until [`Device::clear_faults`].
    pub fn inject(&self, fault: DeviceFault) {
        debug!(?fault, "injecting device fault");
        match fault {
            DeviceFault::AllocFailure => self.inner.alloc_fault.store(true, Ordering::SeqCst),
            DeviceFault::CopyFailure => self.inner.copy_fault.store(true, Ordering::SeqCst),
        }
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        self.inner.alloc_fault.store(false, Ordering::SeqCst);
        self.inner.copy_fault.store(false, Ordering::SeqCst);
    }

    /// Snapshot of allocation and graph accounting.
    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            allocations: self.inner.allocations.load(Ordering::SeqCst),
            frees: self.inner.frees.load(Ordering::SeqCst),
            live_bytes: self.inner.live_bytes.load(Ordering::SeqCst),
            graphs_created: self.inner.graphs_created.load(Ordering::SeqCst),
            graphs_destroyed: self.inner.graphs_destroyed.load(Ordering::SeqCst),
        }
    }

    /// Allocate `len` zero-filled atomic counters.
    ///
    /// A `len` whose byte size is not addressable fails with
    /// [`DeviceError::OutOfMemory`] before anything is reserved.
    pub fn alloc_counters(&self, len: usize) -> Result<DeviceCounters> {
        let bytes = len
            .checked_mul(COUNTER_BYTES)
            .filter(|&bytes| bytes <= isize::MAX as usize)
            .ok_or_else(|| {
                debug!(len, "counter allocation size overflows");
                DeviceError::OutOfMemory {
                    requested: usize::MAX,
                    available: self.available(),
                }
            })?;
        self.reserve(bytes)?;
        let slots: Box<[AtomicU32]> = (0..len).map(|_| AtomicU32::new(0)).collect();
        assert_invariant(
            COUNTERS_ZEROED,
            slots.iter().all(|s| s.load(Ordering::Relaxed) == 0),
            "Fresh device counters are zero-filled",
            Some("alloc_counters"),
        );
        self.inner.allocations.fetch_add(1, Ordering::SeqCst);
        debug!(len, bytes, "allocated device counters");
        Ok(DeviceCounters {
            device: self.clone(),
            slots,
        })
    }

    fn available(&self) -> usize {
        let limit = self.inner.config.memory_limit.unwrap_or(usize::MAX);
        limit.saturating_sub(self.inner.live_bytes.load(Ordering::SeqCst))
    }

    fn reserve(&self, bytes: usize) -> Result<()> {
        let limit = self.inner.config.memory_limit.unwrap_or(usize::MAX);
        if self.inner.alloc_fault.load(Ordering::SeqCst) {
            debug!(bytes, "allocation fault injected");
            return Err(DeviceError::OutOfMemory {
                requested: bytes,
                available: 0,
            });
        }
        self.inner
            .live_bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                live.checked_add(bytes).filter(|&total| total <= limit)
            })
            .map(|_| ())
            .map_err(|live| {
                debug!(bytes, live, limit, "device memory exhausted");
                DeviceError::OutOfMemory {
                    requested: bytes,
                    available: limit.saturating_sub(live),
                }
            })
    }

    fn release(&self, bytes: usize) {
        let previous = self.inner.live_bytes.fetch_sub(bytes, Ordering::SeqCst);
        assert_invariant(
            COUNTERS_FREED_ONCE,
            previous >= bytes,
            "Device memory released at most once",
            Some("DeviceCounters::drop"),
        );
        self.inner.frees.fetch_add(1, Ordering::SeqCst);
        debug!(bytes, "freed device counters");
    }

    pub(crate) fn register_graph(&self) {
        self.inner.graphs_created.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn release_graph(&self) {
        let destroyed = self.inner.graphs_destroyed.fetch_add(1, Ordering::SeqCst) + 1;
        assert_invariant(
            GRAPH_DESTROYED_ONCE,
            destroyed <= self.inner.graphs_created.load(Ordering::SeqCst),
            "Graph handles destroyed at most once",
            Some("ExecGraph::drop"),
        );
    }

    /// Run `kernel` once per thread of `grid` and wait for all of them.
    ///
    /// A panic inside the kernel (a device fault) propagates to the caller
    /// once the launch has unwound.
    pub fn launch<K>(&self, grid: Grid, kernel: K)
    where
        K: Fn(ThreadIdx) + Sync,
    {
        self.launch_dyn(grid, &kernel);
    }

    pub(crate) fn launch_dyn(&self, grid: Grid, kernel: &(dyn Fn(ThreadIdx) + Sync)) {
        trace!(
            blocks = grid.blocks,
            threads_per_block = grid.threads_per_block,
            "kernel launch"
        );
        let run = |global: usize| {
            let _ctx = DeviceContext::enter();
            kernel(grid.thread_at(global));
        };
        if self.inner.config.grid_parallelism {
            (0..grid.size()).into_par_iter().for_each(run);
        } else {
            (0..grid.size()).for_each(run);
        }
        record_invariant(LAUNCH_SYNCHRONIZED);
    }
}

/// An owned block of device-resident atomic counters.
///
/// Freed exactly once when dropped.
#[derive(Debug)]
pub struct DeviceCounters {
    device: Device,
    slots: Box<[AtomicU32]>,
}

impl DeviceCounters {
    /// Number of counters.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when the allocation holds no counters.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Size of the allocation in bytes.
    pub fn bytes(&self) -> usize {
        self.slots.len() * COUNTER_BYTES
    }

    pub(crate) fn slots(&self) -> &[AtomicU32] {
        &self.slots
    }

    /// Synchronously copy every counter to host memory.
    ///
    /// Issues no wait on outstanding device work.
    pub fn copy_to_host(&self) -> Result<Vec<u32>> {
        if self.device.inner.copy_fault.load(Ordering::SeqCst) {
            debug!(bytes = self.bytes(), "copy fault injected");
            return Err(DeviceError::CopyFailed { bytes: self.bytes() });
        }
        let host: Vec<u32> = self.slots.iter().map(|s| s.load(Ordering::Acquire)).collect();
        assert_invariant(
            READBACK_COMPLETE,
            host.len() == self.slots.len(),
            "Readback covers every counter",
            Some("copy_to_host"),
        );
        Ok(host)
    }
}

impl Drop for DeviceCounters {
    fn drop(&mut self) {
        self.device.release(self.bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_code_is_not_on_gpu() {
        assert_eq!(device_type(), DeviceType::Host);
        assert!(!is_on_gpu());
    }

    #[test]
    fn kernels_observe_device_context() {
        let device = Device::default();
        let seen = AtomicU32::new(0);
        device.launch(Grid::linear(8), |_| {
            if is_on_gpu() {
                seen.fetch_add(1, Ordering::Relaxed);
            }
        });
        assert_eq!(seen.load(Ordering::Relaxed), 8);
        assert!(!is_on_gpu());
    }

    #[test]
    fn grid_indices_cover_every_thread() {
        let device = Device::new(DeviceConfig {
            grid_parallelism: false,
            ..DeviceConfig::default()
        });
        let hits: Vec<AtomicU32> = (0..12).map(|_| AtomicU32::new(0)).collect();
        let grid = Grid {
            blocks: 3,
            threads_per_block: 4,
        };
        device.launch(grid, |idx| {
            assert!(idx.thread < 4);
            hits[idx.global()].fetch_add(1, Ordering::Relaxed);
        });
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
    }

    #[test]
    #[should_panic(expected = "grid size overflows")]
    fn overflowing_grid_is_rejected() {
        let grid = Grid {
            blocks: usize::MAX,
            threads_per_block: 2,
        };
        let _ = grid.size();
    }

    #[test]
    fn allocation_accounting() {
        let device = Device::default();
        let counters = device.alloc_counters(4).unwrap();
        assert_eq!(counters.bytes(), 16);
        assert_eq!(device.stats().live_bytes, 16);
        assert_eq!(counters.copy_to_host().unwrap(), vec![0; 4]);
        drop(counters);
        let stats = device.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.frees, 1);
        assert_eq!(stats.live_bytes, 0);
    }

    #[test]
    fn memory_limit_rejects_oversized_allocation() {
        let device = Device::new(DeviceConfig {
            memory_limit: Some(8),
            ..DeviceConfig::default()
        });
        let _first = device.alloc_counters(2).unwrap();
        assert_eq!(
            device.alloc_counters(1).unwrap_err(),
            DeviceError::OutOfMemory {
                requested: 4,
                available: 0
            }
        );
        assert_eq!(device.stats().allocations, 1);
    }

    #[test]
    fn unaddressable_allocation_is_out_of_memory() {
        let device = Device::new(DeviceConfig {
            memory_limit: Some(16),
            ..DeviceConfig::default()
        });
        assert!(matches!(
            device.alloc_counters(1usize << 62),
            Err(DeviceError::OutOfMemory {
                requested: usize::MAX,
                available: 16
            })
        ));
        let unlimited = Device::default();
        assert!(matches!(
            unlimited.alloc_counters(usize::MAX),
            Err(DeviceError::OutOfMemory { .. })
        ));
        assert_eq!(device.stats().allocations, 0);
        assert_eq!(device.stats().live_bytes, 0);
    }

    #[test]
    fn injected_faults_clear() {
        let device = Device::default();
        device.inject(DeviceFault::AllocFailure);
        assert!(device.alloc_counters(1).is_err());
        device.clear_faults();
        let counters = device.alloc_counters(1).unwrap();
        device.inject(DeviceFault::CopyFailure);
        assert_eq!(
            counters.copy_to_host(),
            Err(DeviceError::CopyFailed { bytes: 4 })
        );
    }
}
