//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request path
//!     → router.rs (route lookup, longest prefix first)
//!     → matcher.rs (segment-aligned prefix check, remainder split)
//!     → Return: ResolvedRoute { route, rewritten_path } or no match
//!
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → Normalize prefixes, parse upstream URLs
//!     → Reject duplicate prefixes
//!     → Sort by prefix length
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route

pub mod matcher;
pub mod router;

pub use router::{ResolvedRoute, Route, RouteTable, RouteTableError, Upstream};
