//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Completion transitions (done / cancelled / timeout / rejected):
//!     → tracing events with op and op_id fields
//!     → metrics.rs (counters, latency histogram)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout)
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;
