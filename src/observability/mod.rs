//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! table::store (mutations, commits)
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stderr (pretty or JSON lines)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Structured fields (`routespec`, `alias`, `mode`) on every mutation
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
