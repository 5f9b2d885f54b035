//! HTTP message model and response framing.
//!
//! # Data Flow
//! ```text
//! Incoming bytes
//!     → message.rs (timeout-bounded header scan, body read)
//!     → request.rs / response.rs (line parsing, typed message)
//!     → [routing decides the owning listener]
//!     → response_stream.rs (staging buffer, chunked or fixed framing)
//!     → Outgoing bytes
//! ```
//!
//! # Design Decisions
//! - Messages are immutable once parsed; body text and cookies are
//!   lazily-derived views.
//! - Serialization is byte-deterministic given header insertion order.
//! - The response header block is emitted exactly once per response.

pub mod headers;
pub mod message;
pub mod request;
pub mod response;
pub mod response_stream;

pub use headers::Headers;
pub use message::Version;
pub use request::HttpRequest;
pub use response::HttpResponse;
pub use response_stream::{ResponseHead, ResponseStream};
