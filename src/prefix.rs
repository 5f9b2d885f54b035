//! URI prefix value type.
//!
//! # Responsibilities
//! - Parse a registered prefix string (`http://host:port/path/`)
//! - Normalize the path to a trailing slash
//! - Define prefix equality (host + port + path, scheme excluded)
//!
//! # Design Decisions
//! - Hosts `*` and `+` are wildcard markers, not resolvable names, so the
//!   authority is parsed by hand rather than through a URL library.
//! - Equality deliberately ignores the scheme: two prefixes that differ only
//!   in `http` vs `https` are the same routing entry, and the secure flag is
//!   checked separately at the endpoint level.

use std::fmt;

use crate::error::{Error, Result};

/// A registered URI prefix: scheme-derived secure flag, host, port and path.
#[derive(Debug, Clone)]
pub struct UriPrefix {
    secure: bool,
    host: String,
    port: String,
    path: String,
}

impl UriPrefix {
    /// Parse a prefix string of the form `scheme://host[:port]/path`.
    ///
    /// Accepted schemes are `http`, `ws` (insecure) and `https`, `wss`
    /// (secure). The path is normalized to end with `/`.
    pub fn parse(uri: &str) -> Result<Self> {
        let invalid = || Error::InvalidPrefix(uri.to_string());

        let (scheme, rest) = uri.split_once("://").ok_or_else(invalid)?;

        let secure = match scheme {
            "http" | "ws" => false,
            "https" | "wss" => true,
            _ => return Err(invalid()),
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };

        if authority.is_empty() {
            return Err(invalid());
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) => (h, p),
            None => (authority, if secure { "443" } else { "80" }),
        };

        if host.is_empty() || port.is_empty() {
            return Err(invalid());
        }

        let mut path = path.to_string();
        if !path.ends_with('/') {
            path.push('/');
        }

        Ok(Self {
            secure,
            host: host.to_string(),
            port: port.to_string(),
            path,
        })
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// The port as a number, when it parses as one.
    pub fn port_number(&self) -> Option<u16> {
        self.port.parse().ok()
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

// Equality is host + port + path; the scheme is not considered.
impl PartialEq for UriPrefix {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port && self.path == other.path
    }
}

impl Eq for UriPrefix {}

impl fmt::Display for UriPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "https" } else { "http" };
        write!(f, "{}://{}:{}{}", scheme, self.host, self.port, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_prefix() {
        let p = UriPrefix::parse("http://localhost:8080/app/").unwrap();
        assert!(!p.is_secure());
        assert_eq!(p.host(), "localhost");
        assert_eq!(p.port(), "8080");
        assert_eq!(p.path(), "/app/");
    }

    #[test]
    fn normalizes_trailing_slash() {
        let p = UriPrefix::parse("http://127.0.0.1:9000/chat").unwrap();
        assert_eq!(p.path(), "/chat/");

        let p = UriPrefix::parse("ws://127.0.0.1:9000").unwrap();
        assert_eq!(p.path(), "/");
    }

    #[test]
    fn secure_schemes() {
        assert!(UriPrefix::parse("https://localhost:443/").unwrap().is_secure());
        assert!(UriPrefix::parse("wss://localhost:443/").unwrap().is_secure());
        assert!(!UriPrefix::parse("ws://localhost:80/").unwrap().is_secure());
    }

    #[test]
    fn default_ports() {
        assert_eq!(UriPrefix::parse("http://localhost/").unwrap().port(), "80");
        assert_eq!(UriPrefix::parse("https://localhost/").unwrap().port(), "443");
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(UriPrefix::parse("ftp://localhost:21/").is_err());
        assert!(UriPrefix::parse("localhost:8080/").is_err());
    }

    #[test]
    fn equality_ignores_scheme() {
        let a = UriPrefix::parse("http://localhost:8080/x/").unwrap();
        let b = UriPrefix::parse("https://localhost:8080/x/").unwrap();
        let c = UriPrefix::parse("http://localhost:8080/y/").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn wildcard_hosts() {
        assert_eq!(UriPrefix::parse("http://*:8080/").unwrap().host(), "*");
        assert_eq!(UriPrefix::parse("http://+:8080/").unwrap().host(), "+");
    }
}
