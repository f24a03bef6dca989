//! Upstream forwarding subsystem.
//!
//! # Data Flow
//! ```text
//! Resolved route + inbound request
//!     → forwarder.rs (rewrite URI, clean headers, issue call)
//!     → body.rs (stream request body up, response body down)
//!     → ForwardResult back to the server, or ForwardError
//! ```

pub mod body;
pub mod forwarder;

pub use body::ByteCount;
pub use forwarder::{ForwardError, ForwardResult, ProxyForwarder};
