//! Observability metrics for the transaction manager.
//!
//! Exposed via the `metrics` crate facade; install any recorder (e.g. a
//! Prometheus exporter) in the host to collect them.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `tandem_flow_orders_total` | Counter | `status` | Order status transitions |
//! | `tandem_flow_task_completions_total` | Counter | `status` | Task completions seen by the proxy |
//! | `tandem_flow_alive_orders` | Gauge | - | Orders currently in flight |

use metrics::{counter, gauge};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: order status transitions, labelled by target status.
    pub const ORDERS_TOTAL: &str = "tandem_flow_orders_total";
    /// Counter: task completions applied, labelled by terminal status.
    pub const TASK_COMPLETIONS_TOTAL: &str = "tandem_flow_task_completions_total";
    /// Gauge: orders currently in the alive set.
    pub const ALIVE_ORDERS: &str = "tandem_flow_alive_orders";
}

/// Thin recorder over the metrics facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowMetrics;

impl FlowMetrics {
    /// Creates the recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Records an order entering a status.
    pub fn record_order_transition(&self, status: &'static str) {
        counter!(names::ORDERS_TOTAL, "status" => status).increment(1);
    }

    /// Records one task completion applied by the proxy.
    pub fn record_task_completion(&self, status: &'static str) {
        counter!(names::TASK_COMPLETIONS_TOTAL, "status" => status).increment(1);
    }

    /// Updates the alive-orders gauge.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_alive_orders(&self, count: usize) {
        gauge!(names::ALIVE_ORDERS).set(count as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_an_installed_recorder_is_a_noop() {
        let metrics = FlowMetrics::new();
        metrics.record_order_transition("done");
        metrics.record_task_completion("error");
        metrics.set_alive_orders(3);
    }
}
