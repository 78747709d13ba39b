#![allow(missing_docs)] // proc macros dont play nicely with docstrings

//! # metrics
//!
//! contains process-level statistics for the key service
use std::time::Instant;

use lazy_static::lazy_static;
use prometheus::{
    IntCounter, IntCounterVec, IntGauge, register_int_counter_vec, register_int_gauge,
};
use prometheus_static_metric::make_static_metric;

make_static_metric! {
    pub label_enum PoolOp {
        create,
        checkout,
        info,
        remove,
        release,
        keepalive,
    }
    pub struct OpStats: IntCounter {
        "operation" => PoolOp
    }
}

lazy_static! {
    /// When the server started
    pub static ref START_TIME: Instant = Instant::now();

    pub static ref OP_COUNT_VEC: IntCounterVec = register_int_counter_vec!(
        "operation_counts",
        "Pool Operation Counts",
        &["operation"]
    )
    .unwrap();

    /// aggregate count of pool operations served over the API
    pub static ref OP_COUNT: OpStats = OpStats::from(&OP_COUNT_VEC);

    /// server uptime
    pub static ref UPTIME: IntGauge = register_int_gauge!("uptime", "server uptime (seconds)").unwrap();
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use prometheus::gather;

    use super::OP_COUNT;

    #[test]
    fn operation_counters_are_registered_and_exposed() {
        OP_COUNT.create.inc();
        OP_COUNT.checkout.inc();
        OP_COUNT.keepalive.inc();

        let families = gather();
        let names = families
            .iter()
            .map(|family| family.get_name().to_string())
            .collect::<HashSet<_>>();

        assert!(
            names.contains("operation_counts"),
            "registered metric families: {names:?}"
        );
    }
}
