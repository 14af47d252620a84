//! Metrics and observability
//!
//! Injected hot-path counters, a JSON pool API and a Prometheus exporter.

mod api;
mod counters;
mod exporter;

pub use api::start_api_server;
pub use counters::*;
pub use exporter::init_metrics;
