//! PPT Invariant System: invariant enforcement with contract tracking.
//!
//! Host-side code asserts invariants as it constructs, reads back and tears
//! down resources. Contract tests then check that a scenario actually exercised
//! the invariants it claims to cover.

#[cfg(feature = "ppt")]
use lazy_static::lazy_static;
#[cfg(feature = "ppt")]
use std::collections::HashSet;
#[cfg(feature = "ppt")]
use std::sync::Mutex;

// Invariant constants for contract tracking.
pub const COUNTERS_ZEROED: u32 = 1;
pub const COUNTERS_FREED_ONCE: u32 = 2;
pub const READBACK_COMPLETE: u32 = 3;
pub const GRAPH_LEGALITY: u32 = 4;
pub const GRAPH_REJECTS_INVALID: u32 = 5;
pub const GRAPH_DESTROYED_ONCE: u32 = 6;
pub const EXEC_ORDER_COMPLETE: u32 = 7;
pub const LAUNCH_SYNCHRONIZED: u32 = 8;
pub const TRACER_TOPOLOGY_CAPTURED: u32 = 9;
pub const TRACER_OUTCOME_RECORDED: u32 = 10;

#[cfg(feature = "ppt")]
lazy_static! {
    static ref INVARIANT_LOG: Mutex<HashSet<u32>> = Mutex::new(HashSet::new());
}

#[cfg(feature = "ppt")]
fn invariant_log() -> std::sync::MutexGuard<'static, HashSet<u32>> {
    // A test that panicked while holding the lock must not take the log down with it.
    INVARIANT_LOG.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(feature = "ppt")]
/// Assert an invariant: logs it and panics on failure.
pub(crate) fn assert_invariant(id: u32, condition: bool, message: &str, context: Option<&str>) {
    if !condition {
        let full_message = if let Some(ctx) = context {
            format!("Invariant {} failed: {} (context: {})", id, message, ctx)
        } else {
            format!("Invariant {} failed: {}", id, message)
        };
        tracing::error!(invariant = id, "{}", full_message);
        panic!("{}", full_message);
    }
    invariant_log().insert(id);
}

#[cfg(not(feature = "ppt"))]
/// Assert an invariant: checks condition and panics on failure.
pub(crate) fn assert_invariant(_id: u32, condition: bool, message: &str, _context: Option<&str>) {
    if !condition {
        panic!("Invariant failed: {}", message);
    }
}

/// Record that an invariant held without a condition to check.
///
/// Used on completion paths, which must never panic.
#[cfg(feature = "ppt")]
pub(crate) fn record_invariant(id: u32) {
    invariant_log().insert(id);
}

#[cfg(not(feature = "ppt"))]
pub(crate) fn record_invariant(_id: u32) {}

#[cfg(feature = "ppt")]
/// Contract test: checks that specified invariants were asserted.
pub fn contract_test(test_name: &str, required_invariants: &[u32]) {
    let log = invariant_log();
    let missing: Vec<u32> = required_invariants
        .iter()
        .copied()
        .filter(|inv| !log.contains(inv))
        .collect();
    drop(log); // Drop the lock before panicking
    if !missing.is_empty() {
        panic!(
            "Contract test '{}' failed: invariants not enforced: {:?}",
            test_name, missing
        );
    }
}

#[cfg(not(feature = "ppt"))]
/// Contract test: no-op when PPT feature is disabled.
pub fn contract_test(_test_name: &str, _required_invariants: &[u32]) {}

#[cfg(feature = "ppt")]
/// Clear invariant log (for between test runs).
pub fn clear_invariant_log() {
    invariant_log().clear();
}

#[cfg(not(feature = "ppt"))]
/// Clear invariant log: no-op when PPT feature is disabled.
pub fn clear_invariant_log() {}
