//! Pool-local metrics.
//!
//! Metrics are lazily initialized on first access via `lazy_static!`.
//! Occupancy gauges are refreshed inside the pool's critical section after
//! every mutation; counters accumulate checkout pressure and reclaimer
//! activity.

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntGauge, register_int_counter, register_int_gauge};

lazy_static! {
    /// Count of all live keys
    pub static ref KEYS_TOTAL: IntGauge =
        register_int_gauge!("keys_total", "count of all live keys").unwrap();

    /// Count of keys currently eligible for checkout
    pub static ref KEYS_AVAILABLE: IntGauge = register_int_gauge!(
        "keys_available",
        "count of keys currently eligible for checkout"
    ).unwrap();

    /// Count of keys currently checked out
    pub static ref KEYS_BLOCKED: IntGauge = register_int_gauge!(
        "keys_blocked",
        "count of keys currently checked out"
    ).unwrap();

    /// Count of checkout attempts that found the pool empty
    pub static ref CHECKOUT_EXHAUSTED: IntCounter = register_int_counter!(
        "checkout_exhausted",
        "count of checkout attempts rejected because no key was available"
    ).unwrap();

    /// Count of reclaimer sweeps completed
    pub static ref RECLAIM_SWEEPS: IntCounter = register_int_counter!(
        "reclaim_sweeps",
        "count of reclaimer sweeps completed"
    ).unwrap();

    /// Count of keys force-released after their block timed out
    pub static ref RECLAIMED_BLOCKED_KEYS: IntCounter = register_int_counter!(
        "reclaimed_blocked_keys",
        "count of keys returned to the pool after block timeout"
    ).unwrap();

    /// Count of keys destroyed by idle expiry
    pub static ref EXPIRED_IDLE_KEYS: IntCounter = register_int_counter!(
        "expired_idle_keys",
        "count of keys destroyed after the idle timeout"
    ).unwrap();
}
