//! Observability module
//!
//! The operational event log, `tracing` setup and Prometheus metrics.

pub mod event_log;
pub mod logging;
pub mod metrics;

pub use event_log::{Event, EventCategory, EventLevel, EventLog, EventQuery, EventStats};
pub use logging::init_logging;
pub use metrics::init_metrics;
