//! Completion flags: per-slot device counters that prove work ran exactly once.
//!
//! A [`FlagStore`] owns `N` zeroed atomic counters in device memory. Device code
//! receives a [`Flags`] handle and bumps one slot per unit of work; after the work
//! has been synchronized the host reads the whole array back and checks that every
//! slot was bumped exactly once.
//!
//! ```ignore
//! let device = Device::default();
//! let store = FlagStore::<4>::new(&device)?;
//! let flags = store.get();
//! device.launch(Grid::linear(4), |idx| flags.set(idx.global()));
//! assert!(store.all_set_once()?);
//! ```
//!
//! Handles borrow the store, so it cannot be moved or dropped while any
//! handle (or graph node holding one) is still alive.

use crate::device::{Device, DeviceCounters};
use crate::error::Result;
use std::sync::atomic::{AtomicU32, Ordering};

/// Owner of `N` device-resident completion counters.
#[derive(Debug)]
pub struct FlagStore<const N: usize = 1> {
    counters: DeviceCounters,
}

impl<const N: usize> FlagStore<N> {
    const NON_EMPTY: () = assert!(N > 0, "a flag store needs at least one slot");

    /// Allocate and zero `N` counters on `device`.
    pub fn new(device: &Device) -> Result<Self> {
        #[allow(clippy::let_unit_value)]
        let () = Self::NON_EMPTY;
        let counters = device.alloc_counters(N)?;
        Ok(Self { counters })
    }

    /// Number of slots.
    pub const fn len(&self) -> usize {
        N
    }

    /// Always false; a store has at least one slot.
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// A copyable handle for device code.
    pub fn get(&self) -> Flags<'_> {
        Flags {
            slots: self.counters.slots(),
        }
    }

    /// Copy every counter back to the host.
    pub fn counts(&self) -> Result<[u32; N]> {
        let host = self.counters.copy_to_host()?;
        let mut counts = [0u32; N];
        counts.copy_from_slice(&host);
        Ok(counts)
    }

    /// True iff every slot holds exactly 1.
    ///
    /// The caller must have synchronized all device work that holds a handle;
    /// this only performs the readback.
    pub fn all_set_once(&self) -> Result<bool> {
        let counts = self.counts()?;
        Ok(counts.iter().filter(|&&c| c == 1).count() == N)
    }

    /// Negation of [`FlagStore::all_set_once`].
    pub fn all_unset(&self) -> Result<bool> {
        Ok(!self.all_set_once()?)
    }
}

/// Increment-only view of a [`FlagStore`], usable from device code.
#[derive(Debug, Clone, Copy)]
pub struct Flags<'s> {
    slots: &'s [AtomicU32],
}

impl Flags<'_> {
    /// Atomically add 1 to slot `i`.
    ///
    /// An out-of-range slot is a device fault and panics the launch.
    #[inline]
    pub fn set(&self, i: usize) {
        debug_assert!(crate::device::is_on_gpu(), "flags are set from device code");
        self.slots[i].fetch_add(1, Ordering::Relaxed);
    }

    /// Atomically add 1 to slot 0.
    #[inline]
    pub fn set_first(&self) {
        self.set(0);
    }

    /// Number of addressable slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false for handles obtained from a store.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Grid;

    #[test]
    fn fresh_store_is_unset() {
        let device = Device::default();
        let store = FlagStore::<3>::new(&device).unwrap();
        assert_eq!(store.counts().unwrap(), [0, 0, 0]);
        assert!(!store.all_set_once().unwrap());
        assert!(store.all_unset().unwrap());
    }

    #[test]
    fn default_slot_is_zero() {
        let device = Device::default();
        let store = FlagStore::<1>::new(&device).unwrap();
        let flags = store.get();
        device.launch(Grid::single(), |_| flags.set_first());
        assert!(store.all_set_once().unwrap());
        assert!(!store.all_unset().unwrap());
    }

    #[test]
    fn double_set_is_detected() {
        let device = Device::default();
        let store = FlagStore::<2>::new(&device).unwrap();
        let flags = store.get();
        device.launch(Grid::linear(3), |idx| flags.set(idx.global().min(1)));
        assert_eq!(store.counts().unwrap(), [1, 2]);
        assert!(!store.all_set_once().unwrap());
    }

    #[test]
    fn handles_are_copies_of_the_same_slots() {
        let device = Device::default();
        let store = FlagStore::<2>::new(&device).unwrap();
        let a = store.get();
        let b = a;
        device.launch(Grid::single(), |_| {
            a.set(0);
            b.set(1);
        });
        assert!(store.all_set_once().unwrap());
        assert_eq!(a.len(), 2);
    }

    #[test]
    #[should_panic]
    fn out_of_range_slot_faults_the_launch() {
        let device = Device::default();
        let store = FlagStore::<1>::new(&device).unwrap();
        let flags = store.get();
        device.launch(Grid::single(), |_| flags.set(1));
    }

    #[test]
    fn store_frees_on_drop() {
        let device = Device::default();
        {
            let _store = FlagStore::<8>::new(&device).unwrap();
            assert_eq!(device.stats().live_bytes, 32);
        }
        assert_eq!(device.stats().live_bytes, 0);
        assert_eq!(device.stats().live_allocations(), 0);
    }
}
