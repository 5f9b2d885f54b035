//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted TCP socket
//!     → tls.rs (optional TLS handshake, per-port certificate resolution)
//!     → connection.rs (tracking, request read, routing, handoff or 404)
//!     → Hand off to the matched higher-level listener
//! ```
//!
//! # Design Decisions
//! - Each connection runs on its own task; slow clients never stall accepts
//! - Connections are tracked per endpoint listener for forced shutdown
//! - TLS identities resolve per port, with a configured fallback

pub mod connection;
pub mod tls;
