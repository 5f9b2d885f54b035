//! Server-side transport engine for HTTP and WebSocket endpoints.
//!
//! Applications create an [`HttpListener`], declare URI prefixes on it and
//! register them with an [`EndpointManager`]. The manager binds one endpoint
//! listener per `(address, port)`, routes incoming requests by host and
//! longest path prefix, and hands each matched request back to the owning
//! listener together with its live connection.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod http;
pub mod listener;
pub mod net;
pub mod observability;
pub mod prefix;

pub use config::{load_config, ListenerSettings, TransportConfig};
pub use endpoint::listener::EndpointListener;
pub use endpoint::manager::EndpointManager;
pub use error::{Error, Result};
pub use http::{Headers, HttpRequest, HttpResponse, ResponseHead, ResponseStream, Version};
pub use listener::{GuardedStream, HttpListener, RequestContext};
pub use prefix::UriPrefix;
