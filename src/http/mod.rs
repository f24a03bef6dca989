//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, dispatch)
//!     → request.rs (request ID, validation)
//!     → [routing decides upstream]
//!     → headers.rs (hop-by-hop removal, forwarding headers)
//!     → [proxy forwards and streams]
//!     → response.rs (error mapping for gateway-side failures)
//!     → Send to client
//! ```

pub mod headers;
pub mod request;
pub mod response;
pub mod server;

pub use request::{MalformedRequest, X_REQUEST_ID};
pub use response::GatewayError;
pub use server::{AppState, GatewayServer};
