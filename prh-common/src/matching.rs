//! Generic keyed request matching.
//!
//! One ordered table serves all three mock types; what varies per mock is
//! the key type and how it inspects an incoming request, expressed through
//! [`RequestKey`]. Tables are scripted ahead of a run and read-only while
//! serving, so they can be shared across connection handlers behind an
//! `Arc` without locking.
//!
//! Lookup semantics are **first match wins**: entries are consulted in
//! declaration order and the first key that matches the request decides
//! the response. Overlapping keys are therefore resolved by ordering, not
//! by specificity.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::httpwire::HttpRequestHead;

/// A matchable key over some request shape. Pluggable per mock type: the
/// origin server keys on host + path, the DNS server on hostname, the
/// verifier on the full transaction expectation.
pub trait RequestKey {
    type Request;

    /// Whether this key matches the incoming request.
    fn matches(&self, request: &Self::Request) -> bool;
}

/// One scripted table row: a key plus the response to play when it
/// matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchEntry<K, R> {
    pub key: K,
    pub response: R,
}

/// Result of a table lookup. Absence of a match is a distinct outcome,
/// not an error: the caller decides the no-match policy (synthetic
/// failure response, NXDOMAIN, recorded violation).
#[derive(Debug, PartialEq, Eq)]
pub enum MatchOutcome<'a, K, R> {
    Match(&'a MatchEntry<K, R>),
    NoMatch,
}

impl<K, R> MatchOutcome<'_, K, R> {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Match(_))
    }
}

/// Ordered first-match-wins lookup table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMatchTable<K, R> {
    entries: Vec<MatchEntry<K, R>>,
}

impl<K, R> Default for RequestMatchTable<K, R> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<K, R> RequestMatchTable<K, R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Declaration order is lookup order.
    pub fn add_entry(&mut self, key: K, response: R) {
        self.entries.push(MatchEntry { key, response });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[MatchEntry<K, R>] {
        &self.entries
    }
}

impl<K: RequestKey, R> RequestMatchTable<K, R> {
    /// Return the first entry whose key matches the request.
    pub fn lookup(&self, request: &K::Request) -> MatchOutcome<'_, K, R> {
        for entry in &self.entries {
            if entry.key.matches(request) {
                return MatchOutcome::Match(entry);
            }
        }
        MatchOutcome::NoMatch
    }
}

/// Key over an HTTP-shaped request. Unspecified components match
/// anything; specified components must all match. Header names compare
/// case-insensitively; a host key without a port matches the request's
/// host part regardless of port.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpMatchKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
}

impl HttpMatchKey {
    /// The default origin-server key: host + path.
    pub fn host_path(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn path_only(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

fn host_matches(expected: &str, actual: &str) -> bool {
    if expected.contains(':') {
        return expected.eq_ignore_ascii_case(actual);
    }
    let actual_host = actual.split(':').next().unwrap_or(actual);
    expected.eq_ignore_ascii_case(actual_host)
}

impl RequestKey for HttpMatchKey {
    type Request = HttpRequestHead;

    fn matches(&self, request: &HttpRequestHead) -> bool {
        if let Some(method) = &self.method
            && !method.eq_ignore_ascii_case(&request.method)
        {
            return false;
        }
        if let Some(path) = &self.path
            && path != &request.path
        {
            return false;
        }
        if let Some(host) = &self.host {
            match request.header("host") {
                Some(actual) => {
                    if !host_matches(host, actual) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        for (name, value) in &self.headers {
            match request.header(name) {
                Some(actual) if actual == value => {}
                _ => return false,
            }
        }
        true
    }
}

/// Scripted HTTP response: played byte-for-byte as declared, plus
/// optional timing metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedResponse {
    pub status: u16,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: String,
    /// Delay before the response is written, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

impl ScriptedResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: None,
            headers: Vec::new(),
            body: String::new(),
            delay_ms: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = Some(delay.as_millis() as u64);
        self
    }

    pub fn delay(&self) -> Option<Duration> {
        self.delay_ms.map(Duration::from_millis)
    }

    /// Default response for requests no entry matches: a deterministic
    /// failure rather than a stall, so retry/fallback logic under test
    /// sees a bounded outcome.
    pub fn no_match_default() -> Self {
        Self::new(404)
            .with_reason("Not Found")
            .with_header("x-prh-no-match", "1")
            .with_header("connection", "close")
    }
}

/// The generated artifact a mock origin server loads at startup: the
/// scripted table plus an optional no-match response override. Written
/// by the runner before the server process is spawned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OriginScript {
    #[serde(default)]
    pub table: RequestMatchTable<HttpMatchKey, ScriptedResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_match: Option<ScriptedResponse>,
}

impl OriginScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_exchange(&mut self, key: HttpMatchKey, response: ScriptedResponse) -> &mut Self {
        self.table.add_entry(key, response);
        self
    }

    pub fn no_match_response(&self) -> ScriptedResponse {
        self.no_match
            .clone()
            .unwrap_or_else(ScriptedResponse::no_match_default)
    }

    pub fn load_file(path: &std::path::Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn write_to(&self, path: &std::path::Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)
    }
}
