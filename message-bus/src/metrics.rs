//! Prometheus metrics for message bus

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

lazy_static! {
    /// Total publish calls, labelled by final status
    pub static ref MESSAGE_PUBLISH_TOTAL: CounterVec = register_counter_vec!(
        "pin_bus_publish_total",
        "Total messages published",
        &["exchange", "status"]
    )
    .unwrap();

    /// Publish duration including retries
    pub static ref MESSAGE_PUBLISH_DURATION: HistogramVec = register_histogram_vec!(
        "pin_bus_publish_duration_seconds",
        "Message publish duration in seconds",
        &["exchange"]
    )
    .unwrap();

    /// Exchange declarations, labelled by outcome
    pub static ref EXCHANGE_DECLARE_TOTAL: CounterVec = register_counter_vec!(
        "pin_bus_declare_total",
        "Exchange declarations (ok/mismatch/error)",
        &["exchange", "status"]
    )
    .unwrap();
}
