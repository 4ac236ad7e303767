//! Invariant enforcement with contract tracking.
//!
//! Control-path code asserts its invariants through [`assert_invariant`];
//! with the `ppt` feature on, every asserted id is logged so tests can check
//! that a scenario actually exercised the invariants it claims to cover.
//! Never called from the render path.

#[cfg(feature = "ppt")]
use lazy_static::lazy_static;
#[cfg(feature = "ppt")]
use std::collections::HashSet;
#[cfg(feature = "ppt")]
use std::sync::Mutex;

/// Automation events stay sorted by start time after every insertion.
pub const AUTOMATION_EVENTS_SORTED: u32 = 1;
/// Port and parameter indices are checked before the graph is mutated.
pub const PORT_INDEX_VALIDATED: u32 = 2;
/// A compiled plan schedules every live node exactly once.
pub const PLAN_COVERS_LIVE_NODES: u32 = 3;
/// Every accepted feedback cycle contains a delay node.
pub const CYCLE_HAS_DELAY: u32 = 4;
/// Non-stale edges always run from an earlier to a later node in the order.
pub const PLAN_ORDER_RESPECTS_EDGES: u32 = 5;
/// Scheduled sources are started and stopped at most once.
pub const SOURCE_LIFECYCLE_ONCE: u32 = 6;

#[cfg(feature = "ppt")]
lazy_static! {
    static ref INVARIANT_LOG: Mutex<HashSet<u32>> = Mutex::new(HashSet::new());
}

#[cfg(feature = "ppt")]
/// Assert an invariant: logs it and panics on failure.
pub fn assert_invariant(id: u32, condition: bool, message: &str, context: Option<&str>) {
    if !condition {
        let full_message = if let Some(ctx) = context {
            format!("Invariant {} failed: {} (context: {})", id, message, ctx)
        } else {
            format!("Invariant {} failed: {}", id, message)
        };
        tracing::error!("{}", full_message);
        panic!("{}", full_message);
    }
    INVARIANT_LOG
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .insert(id);
}

#[cfg(not(feature = "ppt"))]
/// Assert an invariant: checks condition and panics on failure.
pub fn assert_invariant(_id: u32, condition: bool, message: &str, _context: Option<&str>) {
    if !condition {
        panic!("Invariant failed: {}", message);
    }
}

#[cfg(feature = "ppt")]
/// Contract test: checks that specified invariants were asserted.
pub fn contract_test(test_name: &str, required_invariants: &[u32]) {
    let log = INVARIANT_LOG
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let missing: Vec<u32> = required_invariants
        .iter()
        .copied()
        .filter(|inv| !log.contains(inv))
        .collect();
    drop(log);
    if !missing.is_empty() {
        panic!(
            "Contract test '{}' failed: invariants not enforced: {:?}",
            test_name, missing
        );
    }
}

#[cfg(not(feature = "ppt"))]
/// Contract test: no-op when the `ppt` feature is disabled.
pub fn contract_test(_test_name: &str, _required_invariants: &[u32]) {}

#[cfg(feature = "ppt")]
/// Clear the invariant log.
pub fn clear_invariant_log() {
    INVARIANT_LOG
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clear();
}

#[cfg(not(feature = "ppt"))]
/// Clear the invariant log: no-op when the `ppt` feature is disabled.
pub fn clear_invariant_log() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assert_invariant_pass() {
        assert_invariant(PLAN_COVERS_LIVE_NODES, true, "plan complete", Some("unit"));
    }

    #[test]
    #[should_panic]
    fn test_assert_invariant_fail() {
        assert_invariant(CYCLE_HAS_DELAY, 1 + 1 == 3, "cycle without delay", None);
    }

    #[test]
    fn test_contract_test() {
        assert_invariant(SOURCE_LIFECYCLE_ONCE, true, "single start", None);
        contract_test("lifecycle", &[SOURCE_LIFECYCLE_ONCE]);
    }
}
