//! Push-based observability for optionsentry.
//!
//! No HTTP server is started here; nothing in this module accepts inbound
//! connections. Metrics accumulate in a `prometheus::Registry` for an external
//! collaborator to scrape (§1 Non-goals), and the reporter periodically logs a
//! structured JSON snapshot alongside the `tracing` event stream.

pub mod metrics;
pub mod reporter;

pub use metrics::Metrics;
pub use reporter::MetricsReporter;
