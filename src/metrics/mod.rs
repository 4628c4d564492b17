//! Prometheus counters for the allocation engine.
//!
//! All counters live in [`REGISTRY`]; [`gather_text`] renders them in the text exposition format.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::warn;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref ALLOCATION_COMMITS: IntCounter = IntCounter::new(
        "allocation_commits_total",
        "Total number of successful allocation commits"
    )
    .expect("metric can be created");
    pub static ref ALLOCATION_COMMIT_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "allocation_commit_failures_total",
            "Total number of failed allocation commits"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
    pub static ref RESERVATIONS_PREEMPTED: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "reservations_preempted_total",
            "Soft reservations released or reduced by preemption"
        ),
        &["outcome"]
    )
    .expect("metric can be created");
    pub static ref GATEWAY_REGISTRATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "erp_gateway_registrations_total",
            "ERP registration attempts by outcome"
        ),
        &["outcome"]
    )
    .expect("metric can be created");
    pub static ref RESERVATIONS_RELEASED: IntCounter = IntCounter::new(
        "reservations_released_total",
        "Total number of reservations moved to RELEASED"
    )
    .expect("metric can be created");
}

/// Registers every counter with [`REGISTRY`]. Safe to call more than once.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ALLOCATION_COMMITS.clone()),
        Box::new(ALLOCATION_COMMIT_FAILURES.clone()),
        Box::new(RESERVATIONS_PREEMPTED.clone()),
        Box::new(GATEWAY_REGISTRATIONS.clone()),
        Box::new(RESERVATIONS_RELEASED.clone()),
    ];
    for collector in collectors {
        if let Err(e) = REGISTRY.register(collector) {
            if !matches!(e, prometheus::Error::AlreadyReg) {
                warn!(error = %e, "Failed to register metric");
            }
        }
    }
}

pub fn record_commit_failure(error_type: &str) {
    ALLOCATION_COMMIT_FAILURES
        .with_label_values(&[error_type])
        .inc();
}

pub fn gather_text() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_counters_are_exported() {
        register_metrics();
        register_metrics();
        ALLOCATION_COMMITS.inc();
        record_commit_failure("insufficient_quantity");
        let text = gather_text();
        assert!(text.contains("allocation_commits_total"));
        assert!(text.contains("allocation_commit_failures_total"));
    }
}
