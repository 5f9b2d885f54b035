//! Process-wide endpoint registry.
//!
//! # Responsibilities
//! - Map `(address, port)` endpoints to their endpoint listeners
//! - Validate URI prefixes before they reach a listener
//! - Create listeners on demand and drop them when their last prefix goes
//!
//! # Design Decisions
//! - One coarse operations lock serializes every add/remove; registration is
//!   an administrative path, never per-request.
//! - The endpoint map has its own lock so a listener that closes itself can
//!   deregister without re-entering the operations lock.
//! - Removal is forgiving: tearing down a prefix that never registered is a
//!   no-op, not an error.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex};

use crate::config::TransportConfig;
use crate::endpoint::listener::EndpointListener;
use crate::error::{Error, Result};
use crate::listener::HttpListener;
use crate::prefix::UriPrefix;

/// Registry mapping endpoints to their listeners.
///
/// Create one per process and share it via `Arc`; there is no implicit
/// global instance.
pub struct EndpointManager {
    config: TransportConfig,
    /// Serializes add/remove operations so multi-prefix registration is
    /// logically atomic.
    ops: Mutex<()>,
    endpoints: Mutex<HashMap<SocketAddr, Arc<EndpointListener>>>,
}

impl EndpointManager {
    pub fn new(config: TransportConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            ops: Mutex::new(()),
            endpoints: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Register one URI prefix for `owner`, creating the endpoint listener
    /// when the endpoint is new. Fails with `InvalidPrefix` for non-local
    /// hosts, bad ports or paths containing `%` or `//`, and with
    /// `PrefixConflict` when the endpoint's secure flag disagrees or the
    /// prefix belongs to another owner. Failures leave state unchanged.
    pub fn add_prefix(self: &Arc<Self>, uri: &str, owner: &Arc<HttpListener>) -> Result<()> {
        let _ops = self.ops.lock().unwrap();

        self.add_prefix_inner(uri, owner)?;
        owner.record_prefix(uri);
        Ok(())
    }

    /// Register every prefix `owner` declares, as one logically atomic
    /// operation: a failure rolls back the prefixes added by this call
    /// (rollback faults are suppressed) and re-raises the original error.
    pub fn add_listener(self: &Arc<Self>, owner: &Arc<HttpListener>) -> Result<()> {
        let _ops = self.ops.lock().unwrap();

        let mut added: Vec<String> = Vec::new();

        for uri in owner.prefixes() {
            match self.add_prefix_inner(&uri, owner) {
                Ok(()) => added.push(uri),
                Err(e) => {
                    for uri in &added {
                        self.remove_prefix_inner(uri);
                    }

                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Deregister one prefix. Never fails: a prefix that does not resolve
    /// to a registered listener is ignored.
    pub fn remove_prefix(&self, uri: &str, owner: &Arc<HttpListener>) {
        let _ops = self.ops.lock().unwrap();

        self.remove_prefix_inner(uri);
        owner.forget_prefix(uri);
    }

    /// Deregister every prefix `owner` declares and clear its declarations.
    pub fn remove_listener(&self, owner: &Arc<HttpListener>) {
        let _ops = self.ops.lock().unwrap();

        for uri in owner.prefixes() {
            self.remove_prefix_inner(&uri);
            owner.forget_prefix(&uri);
        }
    }

    /// Drop the registry entry for an endpoint. Called by a listener when
    /// it loses its last prefix and closes itself.
    pub fn remove_endpoint(&self, endpoint: SocketAddr) -> bool {
        self.endpoints.lock().unwrap().remove(&endpoint).is_some()
    }

    /// The listener currently registered for an endpoint, if any.
    pub fn lookup(&self, endpoint: SocketAddr) -> Option<Arc<EndpointListener>> {
        self.endpoints.lock().unwrap().get(&endpoint).cloned()
    }

    fn add_prefix_inner(self: &Arc<Self>, uri: &str, owner: &Arc<HttpListener>) -> Result<()> {
        let invalid = || Error::InvalidPrefix(uri.to_string());

        let prefix = UriPrefix::parse(uri)?;

        let address = host_to_address(prefix.host()).ok_or_else(invalid)?;
        if !is_local_address(&address) {
            return Err(invalid());
        }

        let port = prefix.port_number().filter(|p| *p != 0).ok_or_else(invalid)?;

        let path = prefix.path();
        if path.contains('%') || path.contains("//") {
            return Err(invalid());
        }

        let endpoint = SocketAddr::new(address, port);

        let listener = {
            let mut endpoints = self.endpoints.lock().unwrap();

            match endpoints.get(&endpoint) {
                Some(listener) => {
                    if listener.is_secure() != prefix.is_secure() {
                        return Err(Error::PrefixConflict(uri.to_string()));
                    }

                    listener.clone()
                }
                None => {
                    let listener = EndpointListener::build(
                        endpoint,
                        prefix.is_secure(),
                        owner.settings(),
                        &self.config,
                        self,
                    )?;

                    endpoints.insert(endpoint, listener.clone());
                    listener
                }
            }
        };

        listener.add_prefix(prefix, owner.clone())
    }

    fn remove_prefix_inner(&self, uri: &str) {
        let Ok(prefix) = UriPrefix::parse(uri) else {
            return;
        };

        let Some(address) = host_to_address(prefix.host()) else {
            return;
        };
        if !is_local_address(&address) {
            return;
        }

        let Some(port) = prefix.port_number().filter(|p| *p != 0) else {
            return;
        };

        let path = prefix.path();
        if path.contains('%') || path.contains("//") {
            return;
        }

        let endpoint = SocketAddr::new(address, port);

        // The endpoint lock is released before removal: a listener losing
        // its last prefix closes itself and calls back into
        // `remove_endpoint`.
        let listener = self.endpoints.lock().unwrap().get(&endpoint).cloned();

        let Some(listener) = listener else {
            return;
        };

        if listener.is_secure() != prefix.is_secure() {
            return;
        }

        listener.remove_prefix(&prefix);
    }
}

/// The bind address for a prefix host: wildcards bind every interface, IP
/// literals bind themselves, names resolve through the system resolver.
fn host_to_address(host: &str) -> Option<IpAddr> {
    if host == "*" || host == "+" {
        return Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    if let Ok(address) = host.parse() {
        return Some(address);
    }

    (host, 0u16)
        .to_socket_addrs()
        .ok()?
        .next()
        .map(|addr| addr.ip())
}

/// Only loopback and unspecified addresses are accepted as bind targets.
/// A concrete interface address is rejected even when it belongs to this
/// machine; binding every interface goes through the `*`/`+` wildcards.
fn is_local_address(address: &IpAddr) -> bool {
    address.is_loopback() || address.is_unspecified()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_hosts_bind_any() {
        assert_eq!(
            host_to_address("*"),
            Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
        );
        assert_eq!(
            host_to_address("+"),
            Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
        );
    }

    #[test]
    fn ip_literals_parse_directly() {
        assert_eq!(
            host_to_address("127.0.0.1"),
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST))
        );
    }

    #[test]
    fn localhost_resolves_to_loopback() {
        let address = host_to_address("localhost").expect("localhost must resolve");
        assert!(address.is_loopback());
    }

    #[test]
    fn locality_check() {
        assert!(is_local_address(&"127.0.0.1".parse().unwrap()));
        assert!(is_local_address(&"0.0.0.0".parse().unwrap()));
        assert!(!is_local_address(&"93.184.216.34".parse().unwrap()));
    }
}
