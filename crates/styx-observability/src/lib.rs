//! Styx Observability
//!
//! Prometheus metrics for the Styx log engine.
//!
//! The log manager feeds per-log gauges from each log's stat channel. No
//! exporter lives here: collaborators pull the text exposition through
//! [`gather_text`] and serve it however they like.
//!
//! # Usage
//!
//! ```no_run
//! use styx_observability::{gather_text, metrics};
//!
//! metrics::init();
//! metrics::record_position("orders", 0, 120, 9_600);
//! let text = gather_text().unwrap();
//! ```

pub mod metrics;

pub use metrics::{gather_text, init as init_metrics, REGISTRY};

/// Initialize all observability components
pub fn init() {
    metrics::init();
}
