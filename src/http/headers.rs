//! Ordered, case-insensitive header collection.
//!
//! # Design Decisions
//! - Backed by a `Vec` so insertion order survives serialization; routing and
//!   framing depend on byte-deterministic output.
//! - Names compare case-insensitively; repeated names are allowed (Set-Cookie
//!   and friends).

use std::fmt;

use crate::error::{Error, Result};

/// An ordered multimap of header names to values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Replace every value for `name` with a single entry.
    pub fn set(&mut self, name: &str, value: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.entries.push((name.to_string(), value.to_string()));
    }

    /// Add a value without touching existing entries for the same name.
    pub fn append(&mut self, name: &str, value: &str) {
        self.entries.push((name.to_string(), value.to_string()));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// True when any value for `name`, treated as a comma-separated token
    /// list, contains `token` (case-insensitive).
    pub fn contains_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name).iter().any(|value| {
            value
                .split(',')
                .any(|t| t.trim().eq_ignore_ascii_case(token))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parse one `Name: Value` header line into the collection.
    pub(crate) fn parse_line(&mut self, line: &str) -> Result<()> {
        let idx = line
            .find(':')
            .ok_or_else(|| Error::MalformedRequestLine(line.to_string()))?;

        let name = line[..idx].trim();
        let value = line[idx + 1..].trim();

        if name.is_empty() {
            return Err(Error::MalformedRequestLine(line.to_string()));
        }

        self.entries.push((name.to_string(), value.to_string()));
        Ok(())
    }

    /// Serialize as `Name: Value\r\n` per entry, preserving order.
    pub(crate) fn write_block(&self, out: &mut Vec<u8>) {
        for (name, value) in &self.entries {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_lookup() {
        let mut headers = Headers::new();
        headers.set("Content-Type", "text/html");
        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
        assert_eq!(headers.get("Content-Length"), None);
    }

    #[test]
    fn repeated_names_preserved_in_order() {
        let mut headers = Headers::new();
        headers.append("Set-Cookie", "a=1");
        headers.append("Set-Cookie", "b=2");
        assert_eq!(headers.get("set-cookie"), Some("a=1"));
        assert_eq!(headers.get_all("Set-Cookie"), vec!["a=1", "b=2"]);
    }

    #[test]
    fn set_replaces_all() {
        let mut headers = Headers::new();
        headers.append("X-Test", "1");
        headers.append("X-Test", "2");
        headers.set("x-test", "3");
        assert_eq!(headers.get_all("X-Test"), vec!["3"]);
    }

    #[test]
    fn token_matching() {
        let mut headers = Headers::new();
        headers.set("Connection", "keep-alive, Upgrade");
        assert!(headers.contains_token("Connection", "upgrade"));
        assert!(headers.contains_token("connection", "keep-alive"));
        assert!(!headers.contains_token("Connection", "close"));
    }

    #[test]
    fn parse_line_trims() {
        let mut headers = Headers::new();
        headers.parse_line("Host:  example.com ").unwrap();
        assert_eq!(headers.get("Host"), Some("example.com"));
        assert!(headers.parse_line("no-colon-here").is_err());
    }

    #[test]
    fn block_serialization_preserves_order() {
        let mut headers = Headers::new();
        headers.append("B", "2");
        headers.append("A", "1");

        let mut out = Vec::new();
        headers.write_block(&mut out);
        assert_eq!(out, b"B: 2\r\nA: 1\r\n");
    }
}
