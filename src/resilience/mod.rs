//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → timeouts.rs (connect timeout on the connector)
//!     → timeouts.rs (idle timeout on headers and on every body chunk)
//!     → On timeout: 504, no retry
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every upstream call has a deadline
//! - No retries: a non-idempotent request is never sent twice

pub mod timeouts;

pub use timeouts::TimeoutPolicy;
