//! Endpoint registry subsystem.
//!
//! # Data Flow
//! ```text
//! Higher-level listener registers URI prefixes
//!     → manager.rs (validate, resolve or create the endpoint listener)
//!     → listener.rs (lock-free prefix partition update, accept loop)
//!     → incoming request matched against partitions (routing hot path)
//!
//! Partitions per endpoint listener:
//!     exact-host  → host must match (DNS names compared literally)
//!     "+"         → any host
//!     "*"         → unhandled host, last resort
//! ```
//!
//! # Design Decisions
//! - Routing reads never block: partitions are immutable snapshots behind
//!   atomically-swappable references, writers retry on contention
//! - The manager's map is under one coarse lock; registration is a
//!   control-plane path, not per-request
//! - A listener with no prefixes left closes its socket and deregisters

pub mod listener;
pub mod manager;
