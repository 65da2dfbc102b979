//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! dispatcher / handshake / relay / exec produce:
//!     → logging.rs (structured log events, `connection_id` field)
//!     → metrics.rs (counters)
//! ```
//!
//! # Design Decisions
//! - Connection ID flows through every event of an exchange
//! - Metrics are cheap (no-ops without a recorder)

pub mod logging;
pub mod metrics;
